//! Tracing initialisation: EnvFilter, a pretty-or-JSON stdout layer, and
//! an optional daily-rotated JSON file layer.

use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::domain::models::LoggingConfig;

/// Keep the returned guard alive for the lifetime of the process; dropping
/// it flushes and closes the file writer.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

pub fn init(config: &LoggingConfig) -> anyhow::Result<LogGuard> {
    let env_filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow::anyhow!("invalid log level '{}': {e}", config.level))?;

    let guard = match &config.log_dir {
        Some(log_dir) => {
            let file_appender = rolling::daily(log_dir, "quantlab.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);

            if config.format == "json" {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(io::stdout))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.format == "json" {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(io::stdout))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
                    .init();
            }
            None
        }
    };

    Ok(LogGuard { _guard: guard })
}
