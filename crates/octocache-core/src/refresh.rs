//! Refresh-ahead decorator.
//!
//! Keys read through a [`RefreshCache`] are registered for background
//! refresh. A scheduler task wakes every `tick`, reloads each registered key
//! whose last successful refresh is at least `refresh_interval` old, and
//! writes the result through the wrapped cache. Client reads never wait for
//! a refresh.
//!
//! A key that has not been read for `stop_refresh_after_last_access` is
//! dropped from the registry. A failed refresh keeps the old refresh time,
//! so the next tick retries it. A loader that finds no value writes an
//! absence marker when `cache_null_value` is set and otherwise leaves the
//! entry to expire.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cache::{Cache, Lookup};
use crate::loading::CacheLoader;
use crate::metrics;
use crate::pool::Ttl;
use crate::{CacheError, CacheResult};

/// Options for [`RefreshCache`].
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Minimum age of a key's last refresh before it is refreshed again.
    pub refresh_interval: Duration,
    /// How often the scheduler looks for due keys.
    pub tick: Duration,
    /// Drop keys not read for this long. `None` keeps them forever.
    pub stop_refresh_after_last_access: Option<Duration>,
    /// TTL for refreshed entries; `None` uses the wrapped cache's default.
    pub ttl: Option<Duration>,
    /// Store an absence marker when a refresh loads no value.
    pub cache_null_value: bool,
}

impl RefreshConfig {
    /// Refresh every `refresh_interval`, checking at the same rate (at most
    /// once per second).
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            tick: refresh_interval.min(Duration::from_secs(1)),
            stop_refresh_after_last_access: None,
            ttl: None,
            cache_null_value: false,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stop_refresh_after_last_access(mut self, window: Duration) -> Self {
        self.stop_refresh_after_last_access = Some(window);
        self
    }

    pub fn cache_null_value(mut self, enabled: bool) -> Self {
        self.cache_null_value = enabled;
        self
    }
}

struct Registration<K, V> {
    loader: Arc<dyn CacheLoader<K, V>>,
    interval: Duration,
    last_refresh: Instant,
    last_access: Instant,
    refreshing: bool,
}

struct RefreshState<K, V, C> {
    inner: C,
    loader: Arc<dyn CacheLoader<K, V>>,
    config: RefreshConfig,
    registrations: DashMap<K, Registration<K, V>>,
    closed: AtomicBool,
}

/// Cache decorator that keeps recently read keys warm.
///
/// Must be created inside a Tokio runtime; the scheduler runs until
/// [`close`](RefreshCache::close) is called or the cache is dropped.
pub struct RefreshCache<K, V, C> {
    state: Arc<RefreshState<K, V, C>>,
    shutdown: watch::Sender<bool>,
}

impl<K, V, C> RefreshCache<K, V, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Cache<K, V> + 'static,
{
    /// Wrap `inner` and start the refresh scheduler.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` if the refresh interval or tick is
    /// zero.
    pub fn new(
        inner: C,
        loader: Arc<dyn CacheLoader<K, V>>,
        config: RefreshConfig,
    ) -> CacheResult<Self> {
        if config.refresh_interval.is_zero() {
            return Err(CacheError::configuration("refresh interval must be greater than zero"));
        }
        if config.tick.is_zero() {
            return Err(CacheError::configuration("refresh tick must be greater than zero"));
        }

        let state = Arc::new(RefreshState {
            inner,
            loader,
            config,
            registrations: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_scheduler(Arc::clone(&state), shutdown_rx));

        Ok(Self { state, shutdown })
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &C {
        &self.state.inner
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.state.config
    }

    /// Register `key` for refresh with its own loader (or the default one).
    ///
    /// Replaces any existing registration for the key.
    pub fn register(&self, key: K, loader: Option<Arc<dyn CacheLoader<K, V>>>) {
        self.insert_registration(key, loader, self.state.config.refresh_interval);
    }

    /// Like [`register`](Self::register), refreshing `key` every `interval`
    /// instead of the configured `refresh_interval`.
    ///
    /// Keys are checked once per `tick`, so intervals shorter than the tick
    /// are refreshed once per tick.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` if `interval` is zero.
    pub fn register_with_interval(
        &self,
        key: K,
        loader: Option<Arc<dyn CacheLoader<K, V>>>,
        interval: Duration,
    ) -> CacheResult<()> {
        if interval.is_zero() {
            return Err(CacheError::configuration("refresh interval must be greater than zero"));
        }
        self.insert_registration(key, loader, interval);
        Ok(())
    }

    fn insert_registration(
        &self,
        key: K,
        loader: Option<Arc<dyn CacheLoader<K, V>>>,
        interval: Duration,
    ) {
        if self.is_closed() {
            return;
        }
        let now = Instant::now();
        let loader = loader.unwrap_or_else(|| Arc::clone(&self.state.loader));
        self.state.registrations.insert(
            key,
            Registration {
                loader,
                interval,
                last_refresh: now,
                last_access: now,
                refreshing: false,
            },
        );
    }

    /// Stop refreshing `key`. Returns whether it was registered.
    pub fn unregister(&self, key: &K) -> bool {
        self.state.registrations.remove(key).is_some()
    }

    pub fn is_registered(&self, key: &K) -> bool {
        self.state.registrations.contains_key(key)
    }

    /// Number of keys currently registered for refresh.
    pub fn registered(&self) -> usize {
        self.state.registrations.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Stop the scheduler and drop all registrations.
    ///
    /// Refreshes already running finish; cached entries are left as they are.
    pub fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.state.registrations.clear();
    }

    /// Record an access to `key`, registering it on first sight.
    fn touch(&self, key: &K) {
        if self.is_closed() {
            return;
        }
        let now = Instant::now();
        if let Some(mut registration) = self.state.registrations.get_mut(key) {
            registration.last_access = now;
            return;
        }
        self.state
            .registrations
            .entry(key.clone())
            .and_modify(|r| r.last_access = now)
            .or_insert_with(|| Registration {
                loader: Arc::clone(&self.state.loader),
                interval: self.state.config.refresh_interval,
                last_refresh: now,
                last_access: now,
                refreshing: false,
            });
    }
}

impl<K, V, C> Drop for RefreshCache<K, V, C> {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
    }
}

async fn run_scheduler<K, V, C>(state: Arc<RefreshState<K, V, C>>, mut shutdown_rx: watch::Receiver<bool>)
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Cache<K, V> + 'static,
{
    info!(
        refresh_interval_ms = state.config.refresh_interval.as_millis() as u64,
        tick_ms = state.config.tick.as_millis() as u64,
        "Refresh scheduler started"
    );

    let mut ticker = interval(state.config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.refresh_due();
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Refresh scheduler shutting down");
                    break;
                }
            }
        }
    }
}

impl<K, V, C> RefreshState<K, V, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Cache<K, V> + 'static,
{
    /// Evict idle registrations and start a refresh for every due key.
    fn refresh_due(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();

        if let Some(window) = self.config.stop_refresh_after_last_access {
            self.registrations.retain(|key, registration| {
                let keep = now.duration_since(registration.last_access) < window;
                if !keep {
                    debug!(key = ?key, "dropping idle refresh registration");
                }
                keep
            });
        }

        let mut due = Vec::new();
        for mut entry in self.registrations.iter_mut() {
            let (key, registration) = entry.pair_mut();
            if !registration.refreshing
                && now.duration_since(registration.last_refresh) >= registration.interval
            {
                registration.refreshing = true;
                due.push((key.clone(), Arc::clone(&registration.loader)));
            }
        }

        for (key, loader) in due {
            let state = Arc::clone(self);
            tokio::spawn(async move {
                state.refresh_one(key, loader).await;
            });
        }
    }

    async fn refresh_one(&self, key: K, loader: Arc<dyn CacheLoader<K, V>>) {
        let result = match loader.load(&key).await {
            Ok(Some(value)) => self.inner.put(&key, &value, self.config.ttl).await,
            Ok(None) if self.config.cache_null_value => {
                self.inner.put_null(&key, self.config.ttl).await
            }
            Ok(None) => Ok(()),
            Err(e) => Err(CacheError::load(format!("{key:?}"), format!("{e:#}"))),
        };

        if let Some(mut registration) = self.registrations.get_mut(&key) {
            registration.refreshing = false;
            if result.is_ok() {
                registration.last_refresh = Instant::now();
            }
        }

        match result {
            Ok(()) => {
                metrics::record_refresh(true);
                debug!(key = ?key, "refreshed cache entry");
            }
            Err(e) => {
                metrics::record_refresh(false);
                warn!(key = ?key, error = %e, "cache refresh failed");
            }
        }
    }
}

#[async_trait]
impl<K, V, C> Cache<K, V> for RefreshCache<K, V, C>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Cache<K, V> + 'static,
{
    async fn lookup(&self, key: &K) -> CacheResult<Lookup<V>> {
        self.touch(key);
        self.state.inner.lookup(key).await
    }

    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.touch(key);
        self.state.inner.get(key).await
    }

    async fn put(&self, key: &K, value: &V, ttl: Option<Duration>) -> CacheResult<()> {
        self.state.inner.put(key, value, ttl).await
    }

    async fn put_null(&self, key: &K, ttl: Option<Duration>) -> CacheResult<()> {
        self.state.inner.put_null(key, ttl).await
    }

    async fn remove(&self, key: &K) -> CacheResult<bool> {
        self.state.inner.remove(key).await
    }

    async fn exists(&self, key: &K) -> CacheResult<bool> {
        self.state.inner.exists(key).await
    }

    async fn ttl(&self, key: &K) -> CacheResult<Ttl> {
        self.state.inner.ttl(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IdentityKeyConvertor, JsonValueCodec};
    use crate::loading::loader_fn;
    use crate::memory::MemoryPool;
    use crate::remote::RemoteCache;
    use std::sync::atomic::AtomicUsize;

    fn remote(pool: &MemoryPool) -> RemoteCache<String, u64, MemoryPool> {
        RemoteCache::builder()
            .pool(pool.clone())
            .key_convertor(IdentityKeyConvertor)
            .value_codec(JsonValueCodec)
            .key_prefix("refresh:")
            .build()
            .unwrap()
    }

    fn counting_loader(calls: &Arc<AtomicUsize>) -> Arc<dyn CacheLoader<String, u64>> {
        let calls = Arc::clone(calls);
        loader_fn(move |_key: String| {
            let calls = Arc::clone(&calls);
            async move { Ok::<_, anyhow::Error>(Some(calls.fetch_add(1, Ordering::SeqCst) as u64 + 1)) }
        })
    }

    #[tokio::test]
    async fn test_get_registers_key() {
        let pool = MemoryPool::new("master");
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = RefreshCache::new(
            remote(&pool),
            counting_loader(&calls),
            RefreshConfig::new(Duration::from_secs(60)),
        )
        .unwrap();

        let key = "k".to_string();
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(cache.is_registered(&key));
        assert_eq!(cache.registered(), 1);

        assert!(cache.unregister(&key));
        assert!(!cache.is_registered(&key));
    }

    #[tokio::test]
    async fn test_refresh_rewrites_due_keys() {
        let pool = MemoryPool::new("master");
        let calls = Arc::new(AtomicUsize::new(0));
        let config = RefreshConfig::new(Duration::from_millis(50)).with_tick(Duration::from_millis(10));
        let cache = RefreshCache::new(remote(&pool), counting_loader(&calls), config).unwrap();

        let key = "k".to_string();
        cache.register(key.clone(), None);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
        let cached = cache.inner().get(&key).await.unwrap();
        assert!(cached.is_some());
        cache.close();
    }

    #[tokio::test]
    async fn test_failed_refresh_is_retried() {
        let pool = MemoryPool::new("master");
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let loader = loader_fn(move |_key: String| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("transient failure");
                }
                Ok(Some(7u64))
            }
        });
        let config = RefreshConfig::new(Duration::from_millis(30)).with_tick(Duration::from_millis(10));
        let cache = RefreshCache::new(remote(&pool), loader, config).unwrap();

        let key = "k".to_string();
        cache.register(key.clone(), None);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(attempts.load(Ordering::SeqCst) >= 2);
        assert_eq!(cache.inner().get(&key).await.unwrap(), Some(7));
        cache.close();
    }

    #[tokio::test]
    async fn test_idle_registrations_are_evicted() {
        let pool = MemoryPool::new("master");
        let calls = Arc::new(AtomicUsize::new(0));
        let config = RefreshConfig::new(Duration::from_millis(20))
            .with_tick(Duration::from_millis(10))
            .stop_refresh_after_last_access(Duration::from_millis(80));
        let cache = RefreshCache::new(remote(&pool), counting_loader(&calls), config).unwrap();

        cache.get(&"idle".to_string()).await.unwrap();
        assert_eq!(cache.registered(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.registered(), 0);

        let settled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_close_stops_refresh() {
        let pool = MemoryPool::new("master");
        let calls = Arc::new(AtomicUsize::new(0));
        let config = RefreshConfig::new(Duration::from_millis(20)).with_tick(Duration::from_millis(10));
        let cache = RefreshCache::new(remote(&pool), counting_loader(&calls), config).unwrap();

        let key = "k".to_string();
        cache.register(key.clone(), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.close();
        assert!(cache.is_closed());
        assert_eq!(cache.registered(), 0);

        // Let any refresh that was already running finish.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_close = calls.load(Ordering::SeqCst);
        assert!(after_close >= 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_close);

        // Entries stay; new reads do not register.
        assert!(cache.get(&key).await.unwrap().is_some());
        assert_eq!(cache.registered(), 0);
    }

    #[tokio::test]
    async fn test_refresh_without_value_honors_null_caching() {
        let pool = MemoryPool::new("master");
        let empty = || loader_fn(|_key: String| async move { Ok::<_, anyhow::Error>(None::<u64>) });
        let config = RefreshConfig::new(Duration::from_millis(20)).with_tick(Duration::from_millis(10));

        let skipping = RefreshCache::new(remote(&pool), empty(), config.clone()).unwrap();
        let key = "gone".to_string();
        skipping.register(key.clone(), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(skipping.inner().lookup(&key).await.unwrap(), Lookup::Miss);
        skipping.close();

        let marking = RefreshCache::new(remote(&pool), empty(), config.cache_null_value(true)).unwrap();
        marking.register(key.clone(), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(marking.inner().lookup(&key).await.unwrap(), Lookup::Null);
        assert_eq!(marking.get(&key).await.unwrap(), None);
        marking.close();
    }

    #[tokio::test]
    async fn test_per_key_interval() {
        let pool = MemoryPool::new("master");
        let fast_calls = Arc::new(AtomicUsize::new(0));
        let slow_calls = Arc::new(AtomicUsize::new(0));
        let config = RefreshConfig::new(Duration::from_secs(60)).with_tick(Duration::from_millis(10));
        let cache = RefreshCache::new(remote(&pool), counting_loader(&slow_calls), config).unwrap();

        cache.register("slow".to_string(), None);
        cache
            .register_with_interval(
                "fast".to_string(),
                Some(counting_loader(&fast_calls)),
                Duration::from_millis(30),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(fast_calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 0);
        assert!(cache.inner().get(&"fast".to_string()).await.unwrap().is_some());
        assert_eq!(cache.inner().get(&"slow".to_string()).await.unwrap(), None);

        let err = cache
            .register_with_interval("zero".to_string(), None, Duration::ZERO)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(!cache.is_registered(&"zero".to_string()));
        cache.close();
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let pool = MemoryPool::new("master");
        let calls = Arc::new(AtomicUsize::new(0));
        let err = RefreshCache::new(
            remote(&pool),
            counting_loader(&calls),
            RefreshConfig::new(Duration::ZERO),
        )
        .err()
        .expect("zero interval must fail");
        assert!(err.is_configuration());
    }
}
