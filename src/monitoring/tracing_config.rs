//! Structured logging with tracing
//!
//! Sets up:
//! - Console logging, text or JSON
//! - JSON file logging with daily rotation
//! - Level filtering from RUST_LOG

use super::config::{LogFormat, MonitoringConfig};
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_PREFIX: &str = "grid-search.log";

/// Initialize the global tracing subscriber.
///
/// Returns the file writer guard when file logging is on. Keep it alive for
/// the duration of the program; dropping it stops file logging.
/// Calling this twice is harmless, the second subscriber is not installed.
pub fn init_tracing(config: &MonitoringConfig) -> std::io::Result<Option<WorkerGuard>> {
    if !config.enabled {
        return Ok(None);
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let console_layer = config
        .enable_console_logging
        .then(|| match config.log_format {
            LogFormat::Json => fmt::layer().with_writer(std::io::stderr).json().boxed(),
            LogFormat::Text => fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
        });

    let (file_layer, guard) = if config.enable_file_logging {
        config.ensure_log_dir()?;
        let (writer, guard) = non_blocking(daily(&config.log_dir, LOG_FILE_PREFIX));
        let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// Log a request with structured fields
///
/// Usage:
/// ```rust,ignore
/// log_request!("GET", "/experiments", 200, 4.5);
/// ```
#[macro_export]
macro_rules! log_request {
    ($method:expr, $path:expr, $status:expr, $duration_ms:expr) => {
        tracing::info!(
            method = $method,
            path = $path,
            status = $status,
            duration_ms = $duration_ms,
            "API Request"
        );
    };
}
