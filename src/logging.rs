use crate::config::Settings;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Logging setup. RUST_LOG wins over `logging.level`.
/// A second call (tests, embedding) is a no-op instead of a panic.
pub fn init(settings: &Settings) {
    let level = settings
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
