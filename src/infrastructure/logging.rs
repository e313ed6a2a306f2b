use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub const LOG_FILE_PREFIX: &str = "studytrack.log";

/// Keeps the non-blocking writer flushing; drop it only at shutdown.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// `RUST_LOG` wins over the configured level.
pub fn init_logging(logs_dir: &Path, default_level: &str) -> LoggingGuards {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed; keeping the existing one");
    }

    tracing::info!(logs_dir = %logs_dir.display(), "logging initialized");

    LoggingGuards {
        _guards: vec![file_guard],
    }
}
