//! Load-on-miss decorator with single-flight semantics.
//!
//! On a miss the decorator runs the loader and stores the result in the
//! wrapped cache. Concurrent misses on the same key share one load: the
//! ticket registry maps each loading key to a shared result future, and
//! every caller that finds a ticket awaits it instead of loading again.
//!
//! ```text
//! get(k) ──► inner.lookup(k) ── Hit ──► value
//!                 │
//!                Miss
//!                 ▼
//!          tickets.entry(k) ── Occupied ──► await shared result
//!                 │
//!              Vacant
//!                 ▼
//!   spawn: loader(k) → inner.put(k) → remove ticket
//! ```
//!
//! Loads run as independent tasks, so a caller that gives up waiting does not
//! cancel the load or leave a stale ticket behind. A failed load writes
//! nothing and removes its ticket; the next `get` loads again.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::cache::{Cache, Lookup};
use crate::metrics;
use crate::pool::Ttl;
use crate::{CacheError, CacheResult};

/// Computes the value for a key on a cache miss.
///
/// `Ok(None)` means the key legitimately has no value; it is a success, not
/// a failure.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>>;
}

/// Adapts an async closure into a [`CacheLoader`].
pub struct FnLoader<F>(F);

#[async_trait]
impl<K, V, F, Fut> CacheLoader<K, V> for FnLoader<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        (self.0)(key.clone()).await
    }
}

/// Wrap an async closure as a shared loader.
///
/// ```ignore
/// let loader = loader_fn(|id: String| async move { Ok(db.find_user(&id).await?) });
/// ```
pub fn loader_fn<K, V, F, Fut>(f: F) -> Arc<dyn CacheLoader<K, V>>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
{
    Arc::new(FnLoader(f))
}

/// Options for [`LoadingCache`].
#[derive(Debug, Clone, Default)]
pub struct LoadingConfig {
    /// TTL for loaded entries; `None` uses the wrapped cache's default.
    pub ttl: Option<Duration>,
    /// Store an absence marker when the loader returns `Ok(None)`.
    pub cache_null_value: bool,
}

type LoadResult<V> = Shared<BoxFuture<'static, CacheResult<Option<V>>>>;

/// An in-flight load for one key.
struct LoadTicket<V> {
    id: u64,
    result: LoadResult<V>,
}

type Tickets<K, V> = Arc<DashMap<K, LoadTicket<V>>>;

/// Removes a ticket when its load task finishes, including by panic.
struct TicketGuard<K: Eq + Hash, V> {
    tickets: Tickets<K, V>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V> Drop for TicketGuard<K, V> {
    fn drop(&mut self) {
        let id = self.id;
        self.tickets.remove_if(&self.key, |_, ticket| ticket.id == id);
    }
}

/// Cache decorator that loads missing values, one load per key at a time.
pub struct LoadingCache<K, V, C> {
    inner: Arc<C>,
    loader: Arc<dyn CacheLoader<K, V>>,
    config: LoadingConfig,
    tickets: Tickets<K, V>,
    next_ticket: AtomicU64,
}

impl<K, V, C> LoadingCache<K, V, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Cache<K, V> + 'static,
{
    pub fn new(inner: C, loader: Arc<dyn CacheLoader<K, V>>, config: LoadingConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            loader,
            config,
            tickets: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn config(&self) -> &LoadingConfig {
        &self.config
    }

    /// Number of loads currently running.
    pub fn in_flight(&self) -> usize {
        self.tickets.len()
    }

    /// Join the in-flight load for `key`, or start one.
    async fn load_once(&self, key: &K) -> CacheResult<Option<V>> {
        let result = match self.tickets.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key = ?key, "joining in-flight load");
                entry.get().result.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let result = self.spawn_load(key.clone(), id);
                entry.insert(LoadTicket {
                    id,
                    result: result.clone(),
                });
                result
            }
        };
        result.await
    }

    fn spawn_load(&self, key: K, id: u64) -> LoadResult<V> {
        let printable_key = format!("{key:?}");
        let guard = TicketGuard {
            tickets: Arc::clone(&self.tickets),
            key,
            id,
        };
        let inner = Arc::clone(&self.inner);
        let loader = Arc::clone(&self.loader);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let result = load_and_store(inner.as_ref(), loader.as_ref(), &guard.key, &config).await;
            drop(guard);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(CacheError::load(
                    printable_key,
                    format!("load task failed: {e}"),
                ))
            })
        }
        .boxed()
        .shared()
    }
}

async fn load_and_store<K, V, C>(
    inner: &C,
    loader: &dyn CacheLoader<K, V>,
    key: &K,
    config: &LoadingConfig,
) -> CacheResult<Option<V>>
where
    K: Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Cache<K, V>,
{
    tracing::debug!(key = ?key, "loading value");
    let loaded = match loader.load(key).await {
        Ok(loaded) => {
            metrics::record_load(true);
            loaded
        }
        Err(e) => {
            metrics::record_load(false);
            tracing::warn!(key = ?key, error = %e, "loader failed");
            return Err(CacheError::load(format!("{key:?}"), format!("{e:#}")));
        }
    };

    match &loaded {
        Some(value) => inner.put(key, value, config.ttl).await?,
        None if config.cache_null_value => inner.put_null(key, config.ttl).await?,
        None => {}
    }
    Ok(loaded)
}

#[async_trait]
impl<K, V, C> Cache<K, V> for LoadingCache<K, V, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Cache<K, V> + 'static,
{
    /// Looks up `key`, loading it on a miss. A load that yields no value is
    /// reported as [`Lookup::Null`].
    async fn lookup(&self, key: &K) -> CacheResult<Lookup<V>> {
        match self.inner.lookup(key).await? {
            Lookup::Miss => Ok(match self.load_once(key).await? {
                Some(value) => Lookup::Hit(value),
                None => Lookup::Null,
            }),
            found => Ok(found),
        }
    }

    async fn put(&self, key: &K, value: &V, ttl: Option<Duration>) -> CacheResult<()> {
        self.inner.put(key, value, ttl).await
    }

    async fn put_null(&self, key: &K, ttl: Option<Duration>) -> CacheResult<()> {
        self.inner.put_null(key, ttl).await
    }

    async fn remove(&self, key: &K) -> CacheResult<bool> {
        self.inner.remove(key).await
    }

    async fn exists(&self, key: &K) -> CacheResult<bool> {
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &K) -> CacheResult<Ttl> {
        self.inner.ttl(key).await
    }
}
