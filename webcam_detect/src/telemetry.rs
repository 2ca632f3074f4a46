use crate::config::LogLevel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(log_level: &LogLevel) {
    let default_directives = format!("{},ort=info", log_level.as_str());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into()))
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();
}
