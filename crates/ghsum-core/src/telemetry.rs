//! Centralised tracing initialisation for ghsum binaries.
//!
//! Call [`init_tracing`] once at program start. Console output honours
//! `RUST_LOG`, falling back to the configured level; an optional log
//! directory adds a daily-rolling plain-text file.
//!
//! Safe to call more than once; only the first call takes effect.

use std::path::Path;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "ghsum";

/// `"debug"`, `"INFO"`, ... to a `Level`; unknown names mean `INFO`.
pub fn parse_level(raw: &str) -> Level {
    Level::from_str(raw.trim()).unwrap_or(Level::INFO)
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON on the console.
/// * `level`: default verbosity when `RUST_LOG` is not set.
/// * `log_dir`: also write to `<log_dir>/ghsum.<date>.log`.
///
/// Keep the returned guard alive for the life of the process or buffered
/// file output is lost.
pub fn init_tracing(json: bool, level: Level, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(build_file_appender) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }

    if let Some(e) = file_error {
        tracing::warn!(error = %e, "file logging disabled");
    }
    guard
}

fn build_file_appender(dir: &Path) -> Result<RollingFileAppender, String> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| e.to_string())
}
