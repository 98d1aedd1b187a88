//! Logging setup for the fencelock binary
//!
//! Console output goes to stderr so command results on stdout stay machine
//! readable. File output, when enabled, is written to `fencelock.log` under
//! `~/fencelock/logs` by default, rotated daily unless `logging.rotation`
//! says `hourly` or `never`.
//! Override the directory with `FENCELOCK_LOG_DIR` or `logging.dir`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::settings::LogSettings;

const LOG_FILE_NAME: &str = "fencelock.log";

/// Log rotation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_logging: bool,
    pub level: Level,
    pub rotation: LogRotation,
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/fencelock/logs", home))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            file_logging: false,
            level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from the `logging` settings section.
    ///
    /// `FENCELOCK_LOG_DIR` takes precedence over `logging.dir`.
    pub fn from_settings(settings: &LogSettings) -> Self {
        let log_dir = std::env::var("FENCELOCK_LOG_DIR")
            .ok()
            .or_else(|| settings.dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        Self {
            log_dir,
            console_output: settings.console,
            file_logging: settings.file,
            level: settings.level.parse().unwrap_or(Level::INFO),
            rotation: settings.rotation,
        }
    }
}

/// Keeps the non-blocking file writer alive; buffered output is flushed on drop
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level for every layer.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;

        let appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(filter);
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(log_dir = %config.log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = LogSettings {
            level: "debug".to_string(),
            console: false,
            file: true,
            dir: Some("/var/log/fencelock".to_string()),
            rotation: LogRotation::Hourly,
        };
        let config = LoggingConfig::from_settings(&settings);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(!config.console_output);
        assert!(config.file_logging);
        if std::env::var("FENCELOCK_LOG_DIR").is_err() {
            assert_eq!(config.log_dir, PathBuf::from("/var/log/fencelock"));
        }
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let settings = LogSettings {
            level: "loud".to_string(),
            ..Default::default()
        };
        let config = LoggingConfig::from_settings(&settings);
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_rotation_maps_to_appender() {
        assert_eq!(Rotation::from(LogRotation::Daily), Rotation::DAILY);
        assert_eq!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(Rotation::from(LogRotation::Never), Rotation::NEVER);
    }
}
