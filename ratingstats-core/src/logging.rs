//! Logging for the ratingstats binaries
//!
//! Each binary writes its own daily-rotated file under
//! `$XDG_STATE_HOME/ratingstats/`, e.g. `ratingstats-worker.log`, so a
//! long-running worker does not interleave with one-off CLI calls.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for `component` (the binary name).
///
/// `RUST_LOG` takes precedence over `config.level`. With `config.stderr`
/// events are also printed to stderr in compact form.
pub fn init(config: &LoggingConfig, component: &str) -> Result<LoggingGuard> {
    init_in(config, component, &Config::state_dir())
}

/// Like [`init`], writing the log file under `log_dir`.
pub fn init_in(config: &LoggingConfig, component: &str, log_dir: &Path) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(format!("{}.log", component))
        .max_log_files(config.max_files.max(1))
        .build(log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    // An embedding host may have installed a subscriber already
    let active = match tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            eprintln!("ratingstats: logging to {} disabled: {}", log_dir.display(), e);
            false
        }
    };

    tracing::info!(
        component,
        path = %log_dir.join(format!("{}.log", component)).display(),
        level = %config.level,
        active,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _guard: guard,
        active,
    })
}

/// Test subscriber: captured output, spans logged on close
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered file output when dropped; hold it for the life of `main`.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
    active: bool,
}

impl LoggingGuard {
    /// False when another global subscriber was already installed, so
    /// nothing reaches the log file.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Current log file for `component` (rotated files carry a date suffix)
pub fn log_file_path(component: &str) -> PathBuf {
    Config::log_path(component)
}
