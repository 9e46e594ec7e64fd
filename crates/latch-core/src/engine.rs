//! Quorum acquisition round
//!
//! One round writes a fresh token to every instance concurrently, counts the
//! acknowledgements and keeps the lock only if a majority acknowledged with
//! validity time to spare. Anything else is rolled back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use latch_store::LockStore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handle::{LockHandle, StoreSet, release_on};
use crate::model::{InstanceResult, InstanceSummary, LockFailure, clock_drift, quorum};

/// Parameters of one acquisition
#[derive(Debug, Clone)]
pub(crate) struct AcquireRequest {
    pub key: String,
    pub expiry: Duration,
    pub wait: Duration,
    pub retry: Duration,
    pub clock_drift_factor: f64,
    /// Limit for each instance call; a slower instance counts as a non-ack
    pub instance_timeout: Duration,
    pub cancellation: CancellationToken,
}

/// What a single round produced
#[derive(Debug)]
pub(crate) enum RoundOutcome {
    Acquired(LockHandle),
    Failed {
        token: String,
        reason: LockFailure,
        summary: InstanceSummary,
    },
    Cancelled,
}

/// Run one acquisition round against every store
pub(crate) async fn acquire_round(stores: &StoreSet, request: &AcquireRequest) -> RoundOutcome {
    let token = Uuid::new_v4().to_string();
    let key = request.key.as_str();
    let started = Instant::now();

    let attempts = stores
        .iter()
        .map(|store| lock_instance(store.as_ref(), key, &token, request));

    let results = tokio::select! {
        biased;
        _ = request.cancellation.cancelled() => {
            // Some writes may have landed before the round was dropped
            release_on(stores, key, &token, request.instance_timeout).await;
            debug!(key = %key, token = %token, "Acquisition round cancelled");
            return RoundOutcome::Cancelled;
        }
        results = join_all(attempts) => results,
    };

    let summary = InstanceSummary::from_results(&results);
    let drift = clock_drift(request.expiry, request.clock_drift_factor);
    let validity = request
        .expiry
        .checked_sub(started.elapsed() + drift)
        .filter(|left| !left.is_zero());
    let quorum = quorum(stores.len());

    match summary.failure(quorum, validity.is_some()) {
        None => {
            let validity = validity.unwrap_or_default();
            debug!(
                key = %key,
                token = %token,
                acquired = summary.acquired,
                validity_ms = validity.as_millis() as u64,
                "Quorum reached"
            );
            RoundOutcome::Acquired(LockHandle::new(
                key.to_string(),
                token,
                validity,
                summary,
                stores.clone(),
                request.instance_timeout,
            ))
        }
        Some(reason) => {
            // A failed or timed-out write may still have landed
            if summary.acquired + summary.errored > 0 {
                let acquired_on: Vec<Arc<dyn LockStore>> = stores
                    .iter()
                    .zip(&results)
                    .filter(|(_, result)| **result != InstanceResult::Conflicted)
                    .map(|(store, _)| store.clone())
                    .collect();
                let rolled_back =
                    release_on(&acquired_on, key, &token, request.instance_timeout).await;
                debug!(key = %key, token = %token, rolled_back, "Rolled back partial acquisition");
            }

            RoundOutcome::Failed {
                token,
                reason,
                summary,
            }
        }
    }
}

async fn lock_instance(
    store: &dyn LockStore,
    key: &str,
    token: &str,
    request: &AcquireRequest,
) -> InstanceResult {
    let attempt = store.set_if_absent(key, token, request.expiry);
    match timeout(request.instance_timeout, attempt).await {
        Ok(Ok(true)) => InstanceResult::Acquired,
        Ok(Ok(false)) => InstanceResult::Conflicted,
        Ok(Err(e)) => {
            warn!(store = %store.name(), key = %key, error = %e, "Store instance did not acknowledge");
            InstanceResult::Error
        }
        Err(_) => {
            warn!(
                store = %store.name(),
                key = %key,
                timeout_ms = request.instance_timeout.as_millis() as u64,
                "Store instance did not answer in time"
            );
            InstanceResult::Error
        }
    }
}
