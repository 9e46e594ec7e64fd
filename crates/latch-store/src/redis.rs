//! Redis lock store
//!
//! One `RedisStore` per independent Redis instance. Writes use
//! `SET key value NX PX ttl`; deletes go through a Lua script so the
//! compare and the delete happen atomically on the server.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::traits::{LockStore, StoreConfig, StoreConnector};

/// Deletes KEYS[1] only when it still holds ARGV[1]
static COMPARE_AND_DELETE: LazyLock<::redis::Script> = LazyLock::new(|| {
    ::redis::Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#,
    )
});

/// A single Redis instance.
///
/// The connection is opened on first use and retried on later calls while the
/// instance stays unreachable, so an endpoint that is down when the factory
/// connects still takes part once it comes back.
pub struct RedisStore {
    name: String,
    client: ::redis::Client,
    connect_timeout: Duration,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Create an unconnected store; fails only on an invalid endpoint URL
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Result<Self> {
        let name = redact_endpoint(endpoint);
        let client = ::redis::Client::open(endpoint).map_err(|e| {
            StoreError::InvalidConfig(format!("invalid endpoint {}: {}", name, e))
        })?;

        Ok(Self {
            name,
            client,
            connect_timeout,
            connection: OnceCell::new(),
        })
    }

    /// Create a store and connect it, failing if the connection cannot be
    /// established within `timeout`.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let store = Self::new(endpoint, timeout)?;
        store.connection().await?;
        Ok(store)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let manager = tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| StoreError::ConnectTimeout {
                    endpoint: self.name.clone(),
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                })??;

                info!(store = %self.name, "Connected to Redis instance");
                Ok::<_, StoreError>(manager)
            })
            .await?;

        Ok(connection.clone())
    }
}

#[async_trait]
impl LockStore for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        // PX rejects 0; a sub-millisecond expiry rounds up to 1ms
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        let written = reply.is_some();
        debug!(store = %self.name, key = %key, ttl_ms, written, "SET NX PX");
        Ok(written)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let deleted: i64 = COMPARE_AND_DELETE
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;

        debug!(store = %self.name, key = %key, deleted, "compare-and-delete");
        Ok(deleted == 1)
    }
}

/// Connector that opens one `RedisStore` per configured endpoint.
///
/// Endpoints that cannot be reached are kept as instances that keep trying
/// to connect; their calls fail and count as non-acks. Connecting fails only
/// on an invalid configuration or when no endpoint is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self, config: &StoreConfig) -> Result<Vec<Arc<dyn LockStore>>> {
        if config.endpoints.is_empty() {
            return Err(StoreError::InvalidConfig(
                "at least one store endpoint is required".to_string(),
            ));
        }

        let stores = config
            .endpoints
            .iter()
            .map(|endpoint| RedisStore::new(endpoint, config.connect_timeout))
            .collect::<Result<Vec<_>>>()?;

        let results = join_all(stores.iter().map(|store| store.connection())).await;
        let outcomes: Vec<Result<()>> = stores
            .iter()
            .zip(results)
            .map(|(store, result)| {
                result.map(|_| ()).inspect_err(|e| {
                    warn!(store = %store.name, error = %e, "Redis instance unreachable, will retry on use");
                })
            })
            .collect();

        let stores = keep_if_any_connected(stores, outcomes)?;
        Ok(stores
            .into_iter()
            .map(|store| Arc::new(store) as Arc<dyn LockStore>)
            .collect())
    }
}

/// Keep every instance as long as at least one connected; otherwise return
/// the first connection error
fn keep_if_any_connected<T>(stores: Vec<T>, outcomes: Vec<Result<()>>) -> Result<Vec<T>> {
    let mut first_error = None;
    let mut connected = 0;
    for outcome in outcomes {
        match outcome {
            Ok(()) => connected += 1,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if connected == 0 => Err(e),
        _ => Ok(stores),
    }
}

/// Strip credentials from an endpoint URL for display
fn redact_endpoint(endpoint: &str) -> String {
    match (endpoint.find("://"), endpoint.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}{}", &endpoint[..scheme_end + 3], &endpoint[at + 1..])
        }
        (None, Some(at)) => endpoint[at + 1..].to_string(),
        _ => endpoint.to_string(),
    }
}
