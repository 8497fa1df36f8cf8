//! Cache of store client handles.
//!
//! One handle per `(service, region, profile, endpoint)`. The first caller
//! for a key constructs the handle through the pool's [`HandleFactory`];
//! concurrent callers for the same key wait on the same cell, so the factory
//! runs once. Cached lookups only take the read lock.

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

/// Identifies one client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub service: String,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub endpoint: Option<String>,
}

impl PoolKey {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            region: None,
            profile: None,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |v: &Option<String>| v.clone().unwrap_or_else(|| "default".to_string());
        write!(
            f,
            "{}:{}:{}:{}",
            self.service,
            part(&self.profile),
            part(&self.region),
            part(&self.endpoint)
        )
    }
}

/// Builds the handle for a key the pool has not seen.
#[async_trait]
pub trait HandleFactory<H>: Send + Sync {
    async fn create(&self, key: &PoolKey) -> StoreResult<H>;
}

/// Counters since construction or the last [`ConnectionPool::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Lookups answered by an existing handle, including callers that waited
    /// on another caller's construction.
    pub hits: u64,
    /// Handles constructed.
    pub misses: u64,
    /// Handles currently cached.
    pub size: usize,
}

/// Shared cache of client handles, passed around by `Arc`.
pub struct ConnectionPool<H> {
    factory: Arc<dyn HandleFactory<H>>,
    handles: RwLock<HashMap<PoolKey, Arc<OnceCell<H>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<H: Clone + Send + Sync + 'static> ConnectionPool<H> {
    pub fn new(factory: Arc<dyn HandleFactory<H>>) -> Self {
        Self {
            factory,
            handles: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the handle for `key`, constructing it on first use.
    ///
    /// A failed construction leaves nothing cached; the next caller tries
    /// again.
    pub async fn get_handle(&self, key: &PoolKey) -> StoreResult<H> {
        let cell = self.cell(key).await;
        if let Some(handle) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "pool hit");
            return Ok(handle.clone());
        }

        let mut constructed = false;
        let handle = cell
            .get_or_try_init(|| {
                constructed = true;
                self.factory.create(key)
            })
            .await?;
        if constructed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "pool miss, handle constructed");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "pool hit after concurrent construction");
        }
        Ok(handle.clone())
    }

    /// Drops every cached handle and zeroes the counters. Handles already
    /// returned to callers stay valid.
    pub async fn reset(&self) {
        let mut handles = self.handles.write().await;
        let dropped = handles.len();
        handles.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!(dropped, "connection pool reset");
    }

    pub async fn stats(&self) -> PoolStats {
        let size = self
            .handles
            .read()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count();
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
        }
    }

    async fn cell(&self, key: &PoolKey) -> Arc<OnceCell<H>> {
        if let Some(cell) = self.handles.read().await.get(key) {
            return Arc::clone(cell);
        }
        let mut handles = self.handles.write().await;
        Arc::clone(handles.entry(key.clone()).or_default())
    }
}

impl<H> fmt::Debug for ConnectionPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
