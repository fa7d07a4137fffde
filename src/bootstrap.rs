//! Bootstrap utilities for pinbus binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the `PINBUS_LOG` environment variable.
///
/// Defaults to "info" level if `PINBUS_LOG` is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Read an optional configuration file path from the command line.
///
/// Accepts either `--config <path>` or a single positional argument.
pub fn parse_config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    match args.next()?.as_str() {
        "--config" | "-c" => args.next(),
        positional => Some(positional.to_string()),
    }
}
