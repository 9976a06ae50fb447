//! Log setup
//!
//! Console output plus a daily rolling file under the configured log directory.

use anyhow::Context;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize console + rolling file logging
pub fn init_logging(log_dir: &str) -> anyhow::Result<()> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        std::fs::create_dir_all(log_path)
            .with_context(|| format!("Failed to create log directory {:?}", log_path))?;
    }

    // jakarta_envmap.YYYY-MM-DD.log
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "jakarta_envmap.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Logging lasts for the whole process
    std::mem::forget(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jakarta_envmap=debug,tower_http=debug"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logging already initialized")?;

    tracing::info!(log_dir, "Logging initialized");
    Ok(())
}

/// Log an API request against a layer
#[macro_export]
macro_rules! log_request {
    ($method:expr, $path:expr) => {
        tracing::info!(method = %$method, path = %$path, "Request received");
    };
    ($method:expr, $path:expr, $($field:tt)*) => {
        tracing::info!(method = %$method, path = %$path, $($field)*, "Request received");
    };
}
