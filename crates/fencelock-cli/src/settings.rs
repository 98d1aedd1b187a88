//! Configuration management for the fencelock binary
//!
//! Settings are layered: built-in defaults, then `conf/fencelock.yml` (or the
//! file given with `--config`), then `FENCELOCK_*` environment variables with
//! `__` between nested keys, e.g. `FENCELOCK_LOCK__TTL_MS=5000`.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use fencelock_common::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CLOCK_DRIFT_FACTOR, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_QUEUE_BASE_PATH, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, DEFAULT_SESSION_TTL_MS,
    DEFAULT_TTL_MS,
};
use fencelock_core::{AcquireRequest, QuorumConfig, SequentialConfig, StrategyKind};

use crate::logging::LogRotation;

pub const DEFAULT_CONFIG_FILE: &str = "conf/fencelock.yml";
pub const ENV_PREFIX: &str = "FENCELOCK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub strategy: StrategyKind,
    /// Storage node endpoints, `redis://host:port` or `memory://name`
    pub backends: Vec<String>,
    pub lock: LockSettings,
    pub quorum: QuorumSettings,
    pub sequential: SequentialSettings,
    pub logging: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Quorum,
            backends: (0..3).map(|i| format!("memory://node-{}", i)).collect(),
            lock: LockSettings::default(),
            quorum: QuorumSettings::default(),
            sequential: SequentialSettings::default(),
            logging: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the default file, if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("backends"),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub wait_ms: Option<u64>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            wait_ms: None,
        }
    }
}

impl LockSettings {
    pub fn request(&self, resource: &str) -> AcquireRequest {
        let request = AcquireRequest::new(resource)
            .with_ttl(Duration::from_millis(self.ttl_ms))
            .with_retry(self.retry_count, Duration::from_millis(self.retry_delay_ms));
        match self.wait_ms {
            Some(wait_ms) => request.with_wait(Duration::from_millis(wait_ms)),
            None => request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumSettings {
    pub call_timeout_ms: u64,
    pub clock_drift_factor: f64,
}

impl Default for QuorumSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            clock_drift_factor: DEFAULT_CLOCK_DRIFT_FACTOR,
        }
    }
}

impl From<&QuorumSettings> for QuorumConfig {
    fn from(settings: &QuorumSettings) -> Self {
        QuorumConfig {
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
            clock_drift_factor: settings.clock_drift_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialSettings {
    pub base_path: String,
    pub session_ttl_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SequentialSettings {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_QUEUE_BASE_PATH.to_string(),
            session_ttl_ms: DEFAULT_SESSION_TTL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl From<&SequentialSettings> for SequentialConfig {
    fn from(settings: &SequentialSettings) -> Self {
        SequentialConfig {
            base_path: settings.base_path.clone(),
            session_ttl: Duration::from_millis(settings.session_ttl_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub console: bool,
    pub file: bool,
    /// Log directory, `~/fencelock/logs` when unset
    pub dir: Option<String>,
    /// File rotation: `daily`, `hourly` or `never`
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: false,
            dir: None,
            rotation: LogRotation::Daily,
        }
    }
}
