//! Logging initialization
//!
//! Console output always, plus an optional daily-rotated file layer.
//! `RUST_LOG` overrides the configured level; noisy dependency modules
//! are quieted by default.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::LoggingConfig;

/// Initialize the global tracing subscriber. The returned guard must be
/// held for the lifetime of the process so buffered file output is
/// flushed on shutdown.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sqlx=warn,hyper=warn,reqwest=warn", config.level))
    });

    let console_layer = fmt::layer().with_target(true);

    if config.file_output {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = rolling::daily(&config.log_dir, "bookwatch.log");
        let (file_writer, guard) = non_blocking(file_appender);
        let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry().with(env_filter).with(console_layer).init();
        Ok(None)
    }
}
