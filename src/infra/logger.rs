// src/infra/logger.rs — Structured logging with tracing

use tracing_subscriber::{fmt, EnvFilter};

use crate::infra::config::LoggingConfig;

/// Install the global fmt subscriber for the embedding host.
///
/// `RUST_LOG` takes precedence over `config.level`. Later calls are no-ops,
/// so hosts and tests may both call it.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
