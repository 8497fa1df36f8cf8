mod common;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tablecraft_store::{
    ConnectionPool, HandleFactory, MemoryStore, PoolKey, PoolStats, SERVICE_NAME, SharedTransport,
    StoreClient, StoreConfig, StoreError, StoreResult,
};
use tablecraft_types::ErrorKind;

/// Counts constructions and hands out numbered handles.
struct CountingFactory {
    created: AtomicUsize,
    delay: Duration,
    failures_left: AtomicUsize,
}

impl CountingFactory {
    fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::new() }
    }

    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::new()
        }
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HandleFactory<Arc<String>> for CountingFactory {
    async fn create(&self, key: &PoolKey) -> StoreResult<Arc<String>> {
        tokio::time::sleep(self.delay).await;
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Connection {
                message: format!("cannot reach {key}"),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(format!("{key}/{n}")))
    }
}

fn key(region: &str) -> PoolKey {
    PoolKey::new(SERVICE_NAME).region(region)
}

// ── Keys ────────────────────────────────────────────────────────

#[test]
fn pool_key_display_fills_defaults() {
    assert_eq!(key("eu-west-1").to_string(), "dynamodb:default:eu-west-1:default");
    let full = PoolKey::new(SERVICE_NAME)
        .region("us-east-1")
        .profile("ops")
        .endpoint("http://localhost:8000");
    assert_eq!(full.to_string(), "dynamodb:ops:us-east-1:http://localhost:8000");
}

#[test]
fn pool_keys_differ_by_any_component() {
    assert_ne!(key("eu-west-1"), key("us-east-1"));
    assert_ne!(key("eu-west-1"), key("eu-west-1").profile("ops"));
    assert_eq!(key("eu-west-1"), key("eu-west-1"));
}

// ── Caching ─────────────────────────────────────────────────────

#[tokio::test]
async fn same_key_returns_same_handle() {
    let factory = Arc::new(CountingFactory::new());
    let pool: ConnectionPool<Arc<String>> = ConnectionPool::new(factory.clone());

    let a = pool.get_handle(&key("eu-west-1")).await.unwrap();
    let b = pool.get_handle(&key("eu-west-1")).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(factory.created(), 1);
    assert_eq!(
        pool.stats().await,
        PoolStats {
            hits: 1,
            misses: 1,
            size: 1
        }
    );
}

#[tokio::test]
async fn distinct_keys_get_distinct_handles() {
    let factory = Arc::new(CountingFactory::new());
    let pool: ConnectionPool<Arc<String>> = ConnectionPool::new(factory.clone());

    let a = pool.get_handle(&key("eu-west-1")).await.unwrap();
    let b = pool.get_handle(&key("us-east-1")).await.unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(factory.created(), 2);
    assert_eq!(pool.stats().await.size, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_constructs_once() {
    common::init_tracing();
    let factory = Arc::new(CountingFactory::slow(Duration::from_millis(20)));
    let pool = Arc::new(ConnectionPool::<Arc<String>>::new(factory.clone()));

    let callers = (0..16).map(|_| {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.get_handle(&key("eu-west-1")).await })
    });
    let handles: Vec<Arc<String>> = futures::future::join_all(callers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(factory.created(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    let stats = pool.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 15);
}

#[tokio::test]
async fn failed_construction_is_not_cached() {
    let factory = Arc::new(CountingFactory::failing(1));
    let pool: ConnectionPool<Arc<String>> = ConnectionPool::new(factory.clone());

    let err = pool.get_handle(&key("eu-west-1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(pool.stats().await.size, 0);

    let handle = pool.get_handle(&key("eu-west-1")).await.unwrap();
    assert_eq!(handle.as_str(), "dynamodb:default:eu-west-1:default/0");
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn reset_drops_handles_and_counters() {
    let factory = Arc::new(CountingFactory::new());
    let pool: ConnectionPool<Arc<String>> = ConnectionPool::new(factory.clone());

    let before = pool.get_handle(&key("eu-west-1")).await.unwrap();
    pool.reset().await;
    assert_eq!(pool.stats().await, PoolStats::default());

    let after = pool.get_handle(&key("eu-west-1")).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.as_str(), "dynamodb:default:eu-west-1:default/0");
    assert_eq!(factory.created(), 2);
}

// ── Client ──────────────────────────────────────────────────────

struct MemoryFactory {
    store: Arc<MemoryStore>,
    created: AtomicUsize,
}

#[async_trait]
impl HandleFactory<SharedTransport> for MemoryFactory {
    async fn create(&self, _key: &PoolKey) -> StoreResult<SharedTransport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}

#[tokio::test]
async fn clients_with_same_endpoint_share_transport() {
    let factory = Arc::new(MemoryFactory {
        store: common::memory_store(),
        created: AtomicUsize::new(0),
    });
    let pool = ConnectionPool::new(factory.clone() as Arc<dyn HandleFactory<SharedTransport>>);
    let config = StoreConfig {
        region: Some("eu-west-1".into()),
        table: Some(common::TABLE.into()),
        ..StoreConfig::default()
    };

    let a = StoreClient::connect(&pool, config.clone()).await.unwrap();
    let b = StoreClient::connect(&pool, config).await.unwrap();

    assert!(Arc::ptr_eq(a.transport(), b.transport()));
    assert_eq!(a.transport().name(), "memory");
    assert!(format!("{a:?}").starts_with("StoreClient { transport: \"memory\""));
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_rejects_invalid_config_before_pooling() {
    let factory = Arc::new(MemoryFactory {
        store: common::memory_store(),
        created: AtomicUsize::new(0),
    });
    let pool = ConnectionPool::new(factory.clone() as Arc<dyn HandleFactory<SharedTransport>>);
    let config = StoreConfig {
        batch_write_chunk_size: 0,
        ..StoreConfig::default()
    };

    let err = StoreClient::connect(&pool, config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}
