//! Store contracts consumed by the lock protocol

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A single independent key-value store instance.
///
/// Both operations must be atomic on the store side. Implementations report
/// transport failures as errors; the lock protocol counts those as non-acks.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Display name of the instance, used in logs
    fn name(&self) -> &str;

    /// Set `key` to `value` with the given expiry only if the key is absent.
    ///
    /// Returns `true` if the key was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `value`.
    ///
    /// Returns `true` if a delete occurred.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;
}

/// Establishes store clients from connection configuration
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Build one instance per configured endpoint.
    ///
    /// Instances that are unreachable at connect time may be returned anyway
    /// as long as their calls fail; the lock protocol counts those as
    /// non-acks. Fails when the configuration is invalid or no endpoint is
    /// reachable.
    async fn connect(&self, config: &StoreConfig) -> Result<Vec<Arc<dyn LockStore>>>;
}

/// Connection configuration for the store instances
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Store endpoints, one per independent instance (e.g. "redis://127.0.0.1:6379")
    pub endpoints: Vec<String>,
    /// Connection timeout per endpoint
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["redis://127.0.0.1:6379".to_string()],
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Create a config with a single endpoint
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoints: vec![endpoint.to_string()],
            ..Default::default()
        }
    }

    /// Create a config with multiple independent endpoints
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
