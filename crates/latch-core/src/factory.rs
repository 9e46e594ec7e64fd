//! Lock factory: the public entry point for creating locks
//!
//! Holds the store connection, established lazily on first use. Concurrent
//! first callers share a single connection attempt; a failed attempt leaves
//! the slot empty so the next call tries again.

use std::sync::Arc;

use latch_store::{LockStore, RedisConnector, StoreConfig, StoreConnector, StoreError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Configuration;
use crate::engine::AcquireRequest;
use crate::error::{LockError, Result};
use crate::handle::{LockHandle, StoreSet};
use crate::model::{AcquireOptions, LockSettings};
use crate::retry::acquire_with_retry;

/// Creates distributed locks against a set of independent store instances
pub struct LockFactory {
    store_config: StoreConfig,
    settings: LockSettings,
    connector: Arc<dyn StoreConnector>,
    stores: OnceCell<StoreSet>,
}

impl LockFactory {
    pub fn new(
        store_config: StoreConfig,
        settings: LockSettings,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            store_config,
            settings,
            connector,
            stores: OnceCell::new(),
        }
    }

    /// Factory over Redis instances
    pub fn redis(store_config: StoreConfig, settings: LockSettings) -> Self {
        Self::new(store_config, settings, Arc::new(RedisConnector))
    }

    /// Redis factory built from application configuration
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        let store_config = config.store_config();
        if store_config.endpoints.is_empty() {
            return Err(LockError::Config(
                "at least one store endpoint is required".to_string(),
            ));
        }
        Ok(Self::redis(store_config, config.lock_settings()?))
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.store_config
    }

    pub fn is_connected(&self) -> bool {
        self.stores.initialized()
    }

    /// Store key for `resource`, with the instance prefix applied
    pub fn resource_key(&self, resource: &str) -> String {
        self.settings.resource_key(resource)
    }

    /// Establish the store connection if it is not yet established
    pub async fn connect(&self) -> Result<()> {
        self.stores().await.map(|_| ())
    }

    async fn stores(&self) -> Result<&StoreSet> {
        self.stores
            .get_or_try_init(|| async {
                debug!(endpoints = self.store_config.endpoints.len(), "Connecting to lock stores");

                let stores: Vec<Arc<dyn LockStore>> = self
                    .connector
                    .connect(&self.store_config)
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Failed to connect to lock stores");
                        LockError::StoreConnection(e)
                    })?;

                if stores.is_empty() {
                    return Err(LockError::StoreConnection(StoreError::InvalidConfig(
                        "connector returned no store instances".to_string(),
                    )));
                }

                info!(instances = stores.len(), "Connected to lock stores");
                Ok(StoreSet::from(stores))
            })
            .await
    }

    /// Acquire a lock on `resource`, retrying until it is acquired, the wait
    /// budget runs out, or the options' cancellation token fires.
    ///
    /// Connection failures are returned immediately and never retried.
    pub async fn create_lock(&self, resource: &str, options: AcquireOptions) -> Result<LockHandle> {
        if resource.is_empty() {
            return Err(LockError::InvalidArgument(
                "resource name must not be empty".to_string(),
            ));
        }

        self.settings.validate().map_err(LockError::InvalidArgument)?;

        let stores = self.stores().await?;

        let expiry = options.expiry.unwrap_or(self.settings.default_expiry);
        let request = AcquireRequest {
            key: self.resource_key(resource),
            expiry,
            wait: options.wait.unwrap_or(self.settings.default_wait),
            retry: options.retry.unwrap_or(self.settings.default_retry),
            clock_drift_factor: self.settings.clock_drift_factor,
            instance_timeout: self.settings.instance_timeout(expiry),
            cancellation: options.cancellation.unwrap_or_default(),
        };

        if request.expiry.is_zero() {
            return Err(LockError::InvalidArgument(
                "expiry must be greater than zero".to_string(),
            ));
        }
        if request.retry.is_zero() {
            return Err(LockError::InvalidArgument(
                "retry interval must be greater than zero".to_string(),
            ));
        }

        acquire_with_retry(stores, &request).await
    }

    /// Acquire with default options and the given cancellation token
    pub async fn create_lock_with_cancellation(
        &self,
        resource: &str,
        cancellation: CancellationToken,
    ) -> Result<LockHandle> {
        self.create_lock(resource, AcquireOptions::new().with_cancellation(cancellation))
            .await
    }

    /// Release a handle obtained from this factory; see [`LockHandle::release`]
    pub async fn release(&self, handle: &LockHandle) -> bool {
        handle.release().await
    }
}
