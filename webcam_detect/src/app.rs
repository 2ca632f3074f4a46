use crate::{
    annotator::Annotator,
    camera::{Camera, CaptureLoop},
    config::Config,
    display::Window,
    session::{Session, SessionReport, SessionSettings},
    snapshot::SnapshotWriter,
};
use std::sync::Arc;
use yolo_detection::{build_detector, ClassCatalog};

pub fn start_app(config: Config) -> anyhow::Result<SessionReport> {
    let catalog = match ClassCatalog::load(&config.labels.get_path()) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            tracing::error!("Failed to load class names: {:?}", e);
            return Err(e.into());
        }
    };

    let detector = match build_detector(&config.model, &catalog) {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!("Failed to load {} model: {:?}", config.model.kind.as_str(), e);
            return Err(e.into());
        }
    };

    let camera = match Camera::open(&config.camera) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };

    let window = Window::open(&config.session.window_title)?;
    tracing::info!("Controls: 'q' to quit, 's' to save the current frame");

    let mut session = Session::new(
        detector,
        CaptureLoop::new(camera, &config.camera),
        window,
        Annotator::new(catalog),
        SnapshotWriter::new(
            config.session.snapshot_dir.clone(),
            config.session.snapshot_prefix.clone(),
        ),
        SessionSettings {
            confidence_threshold: config.model.confidence_threshold,
            key_poll_ms: config.session.key_poll_ms,
        },
    );

    let report = session.run()?;
    Ok(report)
}
