//! Tracing subscriber setup.
//!
//! Binaries embedding the rectifier call [`setup_logging`] once at startup;
//! tests use [`init_test_logging`].

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{anyhow, Context};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `"info"` or `"rectify=debug"`.
    pub base_level: String,
    /// Directory for daily-rolling log files. `None` logs to the console only.
    pub directory: Option<PathBuf>,
    /// File name prefix of the rolling log files.
    pub file_prefix: String,
    /// Number of rotated files kept on disk.
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: "info".to_string(),
            directory: Some(PathBuf::from("logs")),
            file_prefix: "rectify".to_string(),
            max_log_files: 5,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Console output goes to stdout, with WARN and above mirrored to stderr.
/// Fails if a subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.base_level))
        .with_context(|| format!("Invalid log filter '{}'", config.base_level))?;

    let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .with_writer(console_writer);

    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("Failed to create logs directory '{}'", directory.display())
            })?;

            let file_appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .max_log_files(config.max_log_files)
                .build(directory)
                .context("Failed to create log file appender")?;

            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARD
                .set(guard)
                .map_err(|_| anyhow!("Logging already initialized"))?;

            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logger initialization failed")?;

    Ok(())
}

/// Route tracing output through the test harness writer.
///
/// Safe to call from every test; only the first call installs a subscriber.
/// Respects `RUST_LOG`, defaults to `"info"`.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
