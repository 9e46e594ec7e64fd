//! Configuration loading for Latch
//!
//! Layers an optional YAML/TOML file under `LATCH_`-prefixed environment
//! variables (nested keys use `__`, e.g. `LATCH_LOCK__EXPIRY_MS`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use latch_store::StoreConfig;

use crate::error::{LockError, Result};
use crate::model::{
    DEFAULT_CLOCK_DRIFT_FACTOR, DEFAULT_EXPIRY, DEFAULT_RETRY, DEFAULT_WAIT, LockSettings,
};

pub const DEFAULT_CONFIG_FILE: &str = "conf/latch";
pub const DEFAULT_ENDPOINT: &str = "redis://127.0.0.1:6379";

pub const STORE_ENDPOINTS: &str = "store.endpoints";
pub const STORE_CONNECT_TIMEOUT_MS: &str = "store.connect_timeout_ms";
pub const INSTANCE_NAME: &str = "instance_name";
pub const LOCK_EXPIRY_MS: &str = "lock.expiry_ms";
pub const LOCK_WAIT_MS: &str = "lock.wait_ms";
pub const LOCK_RETRY_MS: &str = "lock.retry_ms";
pub const LOCK_CLOCK_DRIFT_FACTOR: &str = "lock.clock_drift_factor";
pub const LOCK_INSTANCE_TIMEOUT_MS: &str = "lock.instance_timeout_ms";
pub const LOG_LEVEL: &str = "log.level";
pub const LOG_DIR: &str = "log.dir";

/// Application configuration wrapper
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration from `path` (required when given) or from
    /// `conf/latch.*` if present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("LATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // ===================== Store =====================

    /// Store endpoints, as a list or a comma-separated string
    pub fn store_endpoints(&self) -> Vec<String> {
        if let Ok(list) = self.config.get::<Vec<String>>(STORE_ENDPOINTS) {
            return list;
        }
        self.config
            .get_string(STORE_ENDPOINTS)
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec![DEFAULT_ENDPOINT.to_string()])
    }

    /// Store connect timeout in milliseconds (default: 5000ms)
    pub fn store_connect_timeout_ms(&self) -> u64 {
        self.config
            .get_int(STORE_CONNECT_TIMEOUT_MS)
            .unwrap_or(5000) as u64
    }

    // ===================== Lock =====================

    pub fn instance_name(&self) -> Option<String> {
        self.config
            .get_string(INSTANCE_NAME)
            .ok()
            .filter(|s| !s.is_empty())
    }

    /// Default lock expiry in milliseconds (default: 60000ms)
    pub fn lock_expiry_ms(&self) -> u64 {
        self.config
            .get_int(LOCK_EXPIRY_MS)
            .unwrap_or(DEFAULT_EXPIRY.as_millis() as i64)
            .max(0) as u64
    }

    /// Default wait budget in milliseconds (default: 30000ms)
    pub fn lock_wait_ms(&self) -> u64 {
        self.config
            .get_int(LOCK_WAIT_MS)
            .unwrap_or(DEFAULT_WAIT.as_millis() as i64)
            .max(0) as u64
    }

    /// Default retry interval in milliseconds (default: 500ms)
    pub fn lock_retry_ms(&self) -> u64 {
        self.config
            .get_int(LOCK_RETRY_MS)
            .unwrap_or(DEFAULT_RETRY.as_millis() as i64)
            .max(0) as u64
    }

    pub fn clock_drift_factor(&self) -> f64 {
        self.config
            .get_float(LOCK_CLOCK_DRIFT_FACTOR)
            .unwrap_or(DEFAULT_CLOCK_DRIFT_FACTOR)
    }

    /// Per-instance answer timeout in milliseconds; derived from the expiry when unset
    pub fn lock_instance_timeout_ms(&self) -> Option<u64> {
        self.config
            .get_int(LOCK_INSTANCE_TIMEOUT_MS)
            .ok()
            .map(|ms| ms.max(0) as u64)
    }

    // ===================== Logging =====================

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOG_LEVEL)
            .unwrap_or_else(|_| "info".to_string())
    }

    /// Directory for rolling log files; file logging is off when unset
    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string(LOG_DIR).ok()
    }

    // ===================== Typed views =====================

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::with_endpoints(self.store_endpoints())
            .with_connect_timeout(Duration::from_millis(self.store_connect_timeout_ms()))
    }

    /// Lock settings, validated
    pub fn lock_settings(&self) -> Result<LockSettings> {
        let settings = LockSettings {
            instance_name: self.instance_name(),
            default_expiry: Duration::from_millis(self.lock_expiry_ms()),
            default_wait: Duration::from_millis(self.lock_wait_ms()),
            default_retry: Duration::from_millis(self.lock_retry_ms()),
            clock_drift_factor: self.clock_drift_factor(),
            instance_timeout: self.lock_instance_timeout_ms().map(Duration::from_millis),
        };
        settings.validate().map_err(LockError::Config)?;
        Ok(settings)
    }
}
