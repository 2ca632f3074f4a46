use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yolo_detection::fetch::{fetch_bundle, ModelBundle};

/// Download pretrained detector artifacts.
#[derive(Parser, Debug)]
#[command(name = "fetch_models")]
struct Args {
    #[arg(value_enum, default_value = "yolov3-tiny")]
    bundle: ModelBundle,
    /// Directory the artifacts are written to.
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    let args = Args::parse();
    match fetch_bundle(args.bundle, &args.model_dir) {
        Ok(fetched) => {
            tracing::info!("Fetched {} files into {:?}", fetched.len(), args.model_dir);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Failed to fetch {:?}: {}", args.bundle, e);
            Err(e.into())
        }
    }
}
