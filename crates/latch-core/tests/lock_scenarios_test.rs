// Integration tests for LockFactory
// Drives the public API against in-memory store instances

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use latch_core::{
    AcquireOptions, CancellationToken, LockError, LockFactory, LockFailure, LockSettings,
    LockStatus, MemoryConnector, MemoryStore, StoreConfig,
};
use latch_store::{LockStore, StoreConnector};

/// Counts set-if-absent calls so tests can observe attempts
struct CountingStore {
    inner: Arc<MemoryStore>,
    sets: AtomicUsize,
}

impl CountingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            sets: AtomicUsize::new(0),
        }
    }

    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockStore for CountingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> latch_store::Result<bool> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> latch_store::Result<bool> {
        self.inner.delete_if_equals(key, value).await
    }
}

/// Instance that accepts calls and never answers
struct SilentStore;

#[async_trait]
impl LockStore for SilentStore {
    fn name(&self) -> &str {
        "silent"
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> latch_store::Result<bool> {
        std::future::pending().await
    }

    async fn delete_if_equals(&self, _key: &str, _value: &str) -> latch_store::Result<bool> {
        std::future::pending().await
    }
}

struct FixedConnector(Vec<Arc<dyn LockStore>>);

#[async_trait]
impl StoreConnector for FixedConnector {
    async fn connect(&self, _config: &StoreConfig) -> latch_store::Result<Vec<Arc<dyn LockStore>>> {
        Ok(self.0.clone())
    }
}

fn memory_factory(instances: usize) -> (LockFactory, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::with_instances(instances));
    let factory = LockFactory::new(
        StoreConfig::default(),
        LockSettings::default(),
        connector.clone(),
    );
    (factory, connector)
}

fn counting_factory(store: Arc<MemoryStore>) -> (LockFactory, Arc<CountingStore>) {
    let counting = Arc::new(CountingStore::new(store));
    let factory = LockFactory::new(
        StoreConfig::default(),
        LockSettings::default(),
        Arc::new(FixedConnector(vec![counting.clone() as Arc<dyn LockStore>])),
    );
    (factory, counting)
}

#[tokio::test(start_paused = true)]
async fn test_ten_concurrent_callers_single_winner() {
    let (factory, connector) = memory_factory(1);
    let factory = Arc::new(factory);
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let factory = factory.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                let options = AcquireOptions::new()
                    .with_expiry(Duration::from_secs(10))
                    .with_wait(Duration::from_secs(10))
                    .with_retry(Duration::from_millis(10));
                let handle = factory.create_lock("R", options).await?;

                // Critical section
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now_active, Ordering::SeqCst);
                entered.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);

                Ok::<_, LockError>(handle)
            })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(handle) => winners.push(handle),
            Err(err) => {
                assert_eq!(err.reason(), Some(LockFailure::Conflicted), "{err}");
                conflicted += 1;
            }
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicted, 9);
    assert_eq!(entered.load(Ordering::SeqCst), 1);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);

    let winner = winners.pop().unwrap();
    assert_eq!(winner.status(), LockStatus::Acquired);
    assert_eq!(
        connector.stores()[0].get("R").as_deref(),
        Some(winner.token())
    );
    assert!(winner.release().await);
    assert!(connector.stores()[0].is_empty());
}

#[tokio::test]
async fn test_token_stored_on_every_contributing_instance() {
    let (factory, connector) = memory_factory(3);
    connector.stores()[2].set_available(false);

    let handle = factory
        .create_lock("R", AcquireOptions::new().with_wait(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(handle.summary().acquired, 2);
    assert_eq!(handle.summary().errored, 1);
    for store in &connector.stores()[..2] {
        assert_eq!(store.get("R").as_deref(), Some(handle.token()));
    }
    assert!(handle.validity() > Duration::ZERO);
    assert!(handle.validity() <= Duration::from_secs(60));
}

#[tokio::test]
async fn test_unreachable_stores_yield_no_quorum() {
    let connector = Arc::new(MemoryConnector::with_instances(3));
    for store in connector.stores() {
        store.set_available(false);
    }
    let counting: Vec<Arc<CountingStore>> = connector
        .stores()
        .iter()
        .map(|s| Arc::new(CountingStore::new(s.clone())))
        .collect();
    let factory = LockFactory::new(
        StoreConfig::default(),
        LockSettings::default(),
        Arc::new(FixedConnector(
            counting
                .iter()
                .map(|s| s.clone() as Arc<dyn LockStore>)
                .collect(),
        )),
    );

    let err = factory
        .create_lock(
            "R",
            AcquireOptions::new()
                .with_wait(Duration::from_millis(100))
                .with_retry(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.reason(), Some(LockFailure::NoQuorum));
    // Several rounds ran, none of them turned into Conflicted or Expired
    assert!(counting[0].sets() > 1);
}

#[tokio::test]
async fn test_wait_shorter_than_retry_makes_one_attempt() {
    let store = Arc::new(MemoryStore::new("m"));
    store
        .set_if_absent("R", "holder", Duration::from_secs(10))
        .await
        .unwrap();
    let (factory, counting) = counting_factory(store);

    let err = factory
        .create_lock(
            "R",
            AcquireOptions::new()
                .with_wait(Duration::from_millis(20))
                .with_retry(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.reason(), Some(LockFailure::Conflicted));
    assert_eq!(counting.sets(), 1);
}

#[tokio::test]
async fn test_cancellation_leaves_no_residual_keys() {
    let (factory, connector) = memory_factory(3);
    let ttl = Duration::from_secs(30);
    connector.stores()[0]
        .set_if_absent("R", "holder", ttl)
        .await
        .unwrap();
    connector.stores()[1]
        .set_if_absent("R", "holder", ttl)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        trigger.cancel();
    });

    let retry = Duration::from_millis(100);
    let started = Instant::now();
    let err = factory
        .create_lock(
            "R",
            AcquireOptions::new()
                .with_wait(Duration::from_secs(30))
                .with_retry(retry)
                .with_cancellation(cancel),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Cancelled { ref resource } if resource == "R"));
    assert!(started.elapsed() < retry);
    assert_eq!(connector.stores()[0].get("R").as_deref(), Some("holder"));
    assert_eq!(connector.stores()[1].get("R").as_deref(), Some("holder"));
    assert!(connector.stores()[2].is_empty());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (factory, connector) = memory_factory(3);

    let handle = factory.create_lock("R", AcquireOptions::new()).await.unwrap();
    assert!(handle.release().await);
    assert!(connector.stores().iter().all(|s| s.is_empty()));

    let other = factory.create_lock("R", AcquireOptions::new()).await.unwrap();
    assert!(!handle.release().await);
    for store in connector.stores() {
        assert_eq!(store.get("R").as_deref(), Some(other.token()));
    }
    other.release().await;
}

#[tokio::test]
async fn test_release_after_expiry_is_silent_noop() {
    let (factory, connector) = memory_factory(1);

    let stale = factory
        .create_lock(
            "R",
            AcquireOptions::new().with_expiry(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!stale.is_valid());

    let fresh = factory.create_lock("R", AcquireOptions::new()).await.unwrap();
    assert!(stale.release().await);
    assert_eq!(
        connector.stores()[0].get("R").as_deref(),
        Some(fresh.token())
    );
    fresh.release().await;
}

#[tokio::test]
async fn test_slow_round_reports_expired() {
    let connector = Arc::new(MemoryConnector::with_instances(1));
    connector.stores()[0].set_latency(Duration::from_millis(30));
    let factory = LockFactory::new(
        StoreConfig::default(),
        LockSettings {
            instance_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        },
        connector.clone(),
    );

    let err = factory
        .create_lock(
            "R",
            AcquireOptions::new()
                .with_expiry(Duration::from_millis(20))
                .with_wait(Duration::ZERO),
        )
        .await
        .unwrap_err();

    assert_eq!(err.reason(), Some(LockFailure::Expired));
    assert_eq!(err.status(), Some(LockStatus::Expired));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_established_once_under_concurrency() {
    let (factory, connector) = memory_factory(3);
    let factory = Arc::new(factory);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let factory = factory.clone();
            tokio::spawn(async move {
                let handle = factory
                    .create_lock(&format!("resource-{}", i), AcquireOptions::new())
                    .await
                    .unwrap();
                handle.release().await
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(connector.connect_count(), 1);
    assert!(factory.is_connected());
}

#[tokio::test]
async fn test_different_resources_do_not_conflict() {
    let (factory, _connector) = memory_factory(3);

    let a = factory.create_lock("A", AcquireOptions::new()).await.unwrap();
    let b = factory.create_lock("B", AcquireOptions::new()).await.unwrap();
    assert_ne!(a.token(), b.token());

    a.release().await;
    b.release().await;
}

#[tokio::test]
async fn test_silent_instance_does_not_block_majority() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    let factory = LockFactory::new(
        StoreConfig::default(),
        LockSettings {
            instance_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
        Arc::new(FixedConnector(vec![
            a.clone() as Arc<dyn LockStore>,
            b.clone() as Arc<dyn LockStore>,
            Arc::new(SilentStore),
        ])),
    );

    let acquired = tokio::time::timeout(
        Duration::from_secs(3),
        factory.create_lock(
            "R",
            AcquireOptions::new().with_wait(Duration::from_millis(200)),
        ),
    )
    .await
    .expect("acquisition must finish despite a silent instance");

    let handle = acquired.unwrap();
    assert_eq!(handle.summary().acquired, 2);
    assert_eq!(handle.summary().errored, 1);
    assert_eq!(a.get("R").as_deref(), Some(handle.token()));
    assert_eq!(b.get("R").as_deref(), Some(handle.token()));

    assert!(handle.release().await);
    assert!(a.is_empty() && b.is_empty());
}

#[tokio::test]
async fn test_silent_majority_fails_within_wait() {
    let a = Arc::new(MemoryStore::new("a"));
    let factory = LockFactory::new(
        StoreConfig::default(),
        LockSettings {
            instance_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        },
        Arc::new(FixedConnector(vec![
            a.clone() as Arc<dyn LockStore>,
            Arc::new(SilentStore),
            Arc::new(SilentStore),
        ])),
    );

    let err = tokio::time::timeout(
        Duration::from_secs(3),
        factory.create_lock(
            "R",
            AcquireOptions::new()
                .with_wait(Duration::from_millis(100))
                .with_retry(Duration::from_millis(10)),
        ),
    )
    .await
    .expect("acquisition must finish despite silent instances")
    .unwrap_err();

    assert_eq!(err.reason(), Some(LockFailure::NoQuorum));
    assert!(a.is_empty());
}

#[tokio::test]
async fn test_wait_forever_acquires_once_free() {
    let (factory, connector) = memory_factory(1);
    connector.stores()[0]
        .set_if_absent("R", "holder", Duration::from_secs(10))
        .await
        .unwrap();

    let releaser = connector.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        releaser.stores()[0]
            .delete_if_equals("R", "holder")
            .await
            .unwrap();
    });

    let handle = factory
        .create_lock(
            "R",
            AcquireOptions::new()
                .with_wait(Duration::MAX)
                .with_retry(Duration::from_millis(10)),
        )
        .await
        .unwrap();
    assert_eq!(
        connector.stores()[0].get("R").as_deref(),
        Some(handle.token())
    );
    handle.release().await;
}
