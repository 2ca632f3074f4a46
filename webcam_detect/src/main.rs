use webcam_detect::{config, start_app, telemetry};

fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    telemetry::init_tracing(&config.log_level);

    let report = start_app(config)?;
    tracing::info!(
        "Processed {} frames, saved {} snapshots",
        report.frames_processed,
        report.snapshots_saved
    );

    Ok(())
}
