//! Wait-and-retry loop around acquisition rounds

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::engine::{AcquireRequest, RoundOutcome, acquire_round};
use crate::error::{LockError, Result};
use crate::handle::{LockHandle, StoreSet};
use crate::metrics::{LOCK_ACQUIRED_TOTAL, LOCK_ATTEMPTS_TOTAL};
use crate::model::LockFailure;

/// Deadline horizon used when the wait budget does not fit in an `Instant`
const UNBOUNDED_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Run rounds until one acquires, the wait budget is spent, or the request
/// is cancelled.
///
/// On timeout the error carries the reason of the last round. A round never
/// starts once the wait budget has elapsed, so a wait shorter than the retry
/// interval yields exactly one round.
pub(crate) async fn acquire_with_retry(
    stores: &StoreSet,
    request: &AcquireRequest,
) -> Result<LockHandle> {
    let started = Instant::now();
    let deadline = started
        .checked_add(request.wait)
        .unwrap_or_else(|| started + UNBOUNDED_WAIT);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let (token, reason) = match acquire_round(stores, request).await {
            RoundOutcome::Acquired(handle) => {
                ::metrics::counter!(LOCK_ATTEMPTS_TOTAL, "status" => "acquired")
                    .increment(1);
                ::metrics::counter!(LOCK_ACQUIRED_TOTAL).increment(1);
                info!(
                    resource = %request.key,
                    token = %handle.token(),
                    attempts,
                    validity_ms = handle.validity().as_millis() as u64,
                    "Lock acquired"
                );
                return Ok(handle);
            }
            RoundOutcome::Cancelled => return Err(cancelled(request, attempts)),
            RoundOutcome::Failed {
                token,
                reason,
                summary,
            } => {
                ::metrics::counter!(LOCK_ATTEMPTS_TOTAL, "status" => reason.as_str())
                    .increment(1);
                debug!(
                    resource = %request.key,
                    attempts,
                    %reason,
                    acquired = summary.acquired,
                    conflicted = summary.conflicted,
                    errored = summary.errored,
                    "Lock attempt failed"
                );
                (token, reason)
            }
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(request, token, reason, attempts));
        }

        let pause = request.retry.min(deadline - now);
        tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => return Err(cancelled(request, attempts)),
            _ = sleep(pause) => {}
        }

        if Instant::now() >= deadline {
            return Err(timed_out(request, token, reason, attempts));
        }
    }
}

fn cancelled(request: &AcquireRequest, attempts: u32) -> LockError {
    info!(resource = %request.key, attempts, "Lock acquisition cancelled");
    LockError::Cancelled {
        resource: request.key.clone(),
    }
}

fn timed_out(
    request: &AcquireRequest,
    token: String,
    reason: LockFailure,
    attempts: u32,
) -> LockError {
    debug!(
        resource = %request.key,
        %reason,
        attempts,
        wait_ms = request.wait.as_millis() as u64,
        "Wait time exhausted"
    );
    LockError::acquisition_failed(request.key.clone(), token, reason)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use latch_store::{LockStore, MemoryStore};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn request(wait: Duration, retry: Duration) -> AcquireRequest {
        AcquireRequest {
            key: "R".to_string(),
            expiry: Duration::from_secs(10),
            wait,
            retry,
            clock_drift_factor: 0.01,
            instance_timeout: Duration::from_secs(1),
            cancellation: CancellationToken::new(),
        }
    }

    fn single(store: &Arc<MemoryStore>) -> StoreSet {
        vec![store.clone() as Arc<dyn LockStore>].into()
    }

    #[tokio::test]
    async fn test_acquires_after_holder_releases() {
        let store = Arc::new(MemoryStore::new("m"));
        store
            .set_if_absent("R", "holder", Duration::from_secs(10))
            .await
            .unwrap();

        let releaser = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            releaser.delete_if_equals("R", "holder").await.unwrap();
        });

        let handle = acquire_with_retry(
            &single(&store),
            &request(Duration::from_secs(2), Duration::from_millis(10)),
        )
        .await
        .unwrap();
        assert_eq!(store.get("R").as_deref(), Some(handle.token()));
    }

    #[tokio::test]
    async fn test_timeout_reports_last_reason() {
        let store = Arc::new(MemoryStore::new("m"));
        store
            .set_if_absent("R", "holder", Duration::from_secs(10))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = acquire_with_retry(
            &single(&store),
            &request(Duration::from_millis(50), Duration::from_millis(10)),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(err.reason(), Some(LockFailure::Conflicted));
        match err {
            LockError::AcquisitionFailed {
                resource, token, ..
            } => {
                assert_eq!(resource, "R");
                assert_ne!(token, "holder");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_between_attempts() {
        let store = Arc::new(MemoryStore::new("m"));
        store
            .set_if_absent("R", "holder", Duration::from_secs(10))
            .await
            .unwrap();

        let req = request(Duration::from_secs(30), Duration::from_millis(20));
        let cancel = req.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = acquire_with_retry(&single(&store), &req).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unbounded_wait_keeps_retrying() {
        let store = Arc::new(MemoryStore::new("m"));
        store
            .set_if_absent("R", "holder", Duration::from_secs(10))
            .await
            .unwrap();

        let releaser = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            releaser.delete_if_equals("R", "holder").await.unwrap();
        });

        let handle = acquire_with_retry(
            &single(&store),
            &request(Duration::MAX, Duration::from_millis(10)),
        )
        .await
        .unwrap();
        assert_eq!(store.get("R").as_deref(), Some(handle.token()));
    }
}
