//! Acquired lock handle

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use latch_store::LockStore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::metrics::LOCK_RELEASED_TOTAL;
use crate::model::{InstanceSummary, LockStatus};

/// Store instances a lock was acquired against
pub(crate) type StoreSet = Arc<[Arc<dyn LockStore>]>;

/// A lock held on a quorum of store instances.
///
/// Only constructed after a successful acquisition. Release is explicit:
/// dropping an unreleased handle leaves the keys in place until they
/// expire on the stores.
pub struct LockHandle {
    resource: String,
    token: String,
    acquired_at: DateTime<Utc>,
    acquired_instant: Instant,
    validity: Duration,
    summary: InstanceSummary,
    stores: StoreSet,
    instance_timeout: Duration,
    released: AtomicBool,
}

impl LockHandle {
    pub(crate) fn new(
        resource: String,
        token: String,
        validity: Duration,
        summary: InstanceSummary,
        stores: StoreSet,
        instance_timeout: Duration,
    ) -> Self {
        Self {
            resource,
            token,
            acquired_at: Utc::now(),
            acquired_instant: Instant::now(),
            validity,
            summary,
            stores,
            instance_timeout,
            released: AtomicBool::new(false),
        }
    }

    /// Store key of the locked resource (instance prefix included)
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Ownership token written to the stores
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Validity left at the moment of acquisition
    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn status(&self) -> LockStatus {
        LockStatus::Acquired
    }

    pub fn summary(&self) -> InstanceSummary {
        self.summary
    }

    /// Local estimate of whether the validity window is still open.
    ///
    /// Advisory only; the stores decide.
    pub fn is_valid(&self) -> bool {
        !self.is_released() && self.acquired_instant.elapsed() < self.validity
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release the lock on every instance whose key still holds our token.
    ///
    /// Returns `true` if this call performed the release, `false` if the
    /// handle had already been released. Instances whose key expired or now
    /// belongs to another holder are skipped, and per-instance store errors
    /// are logged rather than returned.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(resource = %self.resource, "Lock already released");
            return false;
        }

        let deleted = release_on(
            &self.stores,
            &self.resource,
            &self.token,
            self.instance_timeout,
        )
        .await;

        ::metrics::counter!(LOCK_RELEASED_TOTAL).increment(1);
        info!(
            resource = %self.resource,
            token = %self.token,
            deleted,
            instances = self.stores.len(),
            "Lock released"
        );
        true
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource", &self.resource)
            .field("token", &self.token)
            .field("acquired_at", &self.acquired_at)
            .field("validity", &self.validity)
            .field("summary", &self.summary)
            .field("instances", &self.stores.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Compare-and-delete `key` on every store, giving each at most
/// `instance_timeout`; returns how many deletes occurred
pub(crate) async fn release_on(
    stores: &[Arc<dyn LockStore>],
    key: &str,
    token: &str,
    instance_timeout: Duration,
) -> usize {
    let results = join_all(stores.iter().map(|store| async move {
        match timeout(instance_timeout, store.delete_if_equals(key, token)).await {
            Ok(Ok(deleted)) => {
                if !deleted {
                    debug!(store = %store.name(), key = %key, "Key no longer holds our token");
                }
                deleted
            }
            Ok(Err(e)) => {
                warn!(store = %store.name(), key = %key, error = %e, "Failed to release lock on instance");
                false
            }
            Err(_) => {
                warn!(store = %store.name(), key = %key, "Release timed out on instance");
                false
            }
        }
    }))
    .await;

    results.into_iter().filter(|deleted| *deleted).count()
}
