//! The base cache: codec pipeline plus replica routing over a remote store.
//!
//! ## Operation routing
//!
//! | Operation  | Pool                  |
//! |------------|-----------------------|
//! | `lookup`   | read pool (replica)   |
//! | `exists`   | read pool (replica)   |
//! | `ttl`      | read pool (replica)   |
//! | `put`      | master                |
//! | `put_null` | master                |
//! | `remove`   | master                |
//!
//! ## Stored entry layout
//!
//! `[tag: u8][payload]` where tag `1` is followed by the value codec's output
//! and tag `0` (no payload) marks a cached absence.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{Cache, Lookup};
use crate::codec::{KeyConvertor, ValueDecoder, ValueEncoder};
use crate::config::CacheSettings;
use crate::metrics::{self, CacheStats, StatsCounters};
use crate::pool::{ConnectionPool, StoreConnection, Ttl};
use crate::router::{RouteSet, WeightedPool};
use crate::{CacheError, CacheResult};

const NULL_TAG: u8 = 0;
const VALUE_TAG: u8 = 1;

/// Cache over a remote key/value store.
///
/// Build one with [`RemoteCacheBuilder`].
pub struct RemoteCache<K, V, P> {
    routes: RouteSet<P>,
    key_prefix: String,
    key_convertor: Arc<dyn KeyConvertor<K>>,
    value_encoder: Arc<dyn ValueEncoder<V>>,
    value_decoder: Arc<dyn ValueDecoder<V>>,
    expire_after_write: Option<Duration>,
    stats: StatsCounters,
}

impl<K, V, P> RemoteCache<K, V, P>
where
    P: ConnectionPool,
{
    pub fn builder() -> RemoteCacheBuilder<K, V, P> {
        RemoteCacheBuilder::new()
    }

    /// Return the master pool if it is a `T`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::TypeMismatch` when the cache was built with a
    /// different pool type.
    pub fn unwrap<T: Any>(&self) -> CacheResult<&T> {
        (self.routes.master() as &dyn Any)
            .downcast_ref::<T>()
            .ok_or_else(CacheError::type_mismatch::<T>)
    }

    /// All pools the cache routes to.
    pub fn routes(&self) -> &RouteSet<P> {
        &self.routes
    }

    /// Pick the pool the next read would use.
    pub fn read_pool(&self) -> &P {
        self.routes.read_pool()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Default TTL applied by `put` when none is given.
    pub fn expire_after_write(&self) -> Option<Duration> {
        self.expire_after_write
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Store key for `key`: prefix followed by the converted key.
    pub fn encode_key(&self, key: &K) -> CacheResult<Vec<u8>> {
        let converted = self.key_convertor.convert(key)?;
        let mut out = Vec::with_capacity(self.key_prefix.len() + converted.len());
        out.extend_from_slice(self.key_prefix.as_bytes());
        out.extend_from_slice(&converted);
        Ok(out)
    }

    fn encode_entry(&self, value: Option<&V>) -> CacheResult<Vec<u8>> {
        match value {
            Some(value) => {
                let payload = self.value_encoder.encode(value)?;
                let mut out = Vec::with_capacity(payload.len() + 1);
                out.push(VALUE_TAG);
                out.extend_from_slice(&payload);
                Ok(out)
            }
            None => Ok(vec![NULL_TAG]),
        }
    }

    fn decode_entry(&self, bytes: &[u8]) -> CacheResult<Lookup<V>> {
        match bytes.split_first() {
            Some((&VALUE_TAG, payload)) => Ok(Lookup::Hit(self.value_decoder.decode(payload)?)),
            Some((&NULL_TAG, [])) => Ok(Lookup::Null),
            Some((tag, _)) => Err(CacheError::decode(format!(
                "unknown cache entry tag {tag:#04x}"
            ))),
            None => Err(CacheError::decode("empty cache entry")),
        }
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> CacheResult<Option<Duration>> {
        match ttl.or(self.expire_after_write) {
            Some(ttl) if ttl.is_zero() => Err(CacheError::configuration("ttl must be greater than zero")),
            resolved => Ok(resolved),
        }
    }

    async fn write(&self, key: &K, value: Option<&V>, ttl: Option<Duration>) -> CacheResult<()> {
        let store_key = self.encode_key(key)?;
        let ttl = self.resolve_ttl(ttl)?;
        let entry = self.encode_entry(value)?;
        let pool = self.routes.write_pool();

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.store_set(&store_key, &entry, ttl).await
        }
        .await;

        match result {
            Ok(()) => {
                self.stats.put();
                tracing::debug!(
                    key = %printable(&store_key),
                    ttl_ms = ttl.map(|t| t.as_millis() as u64),
                    null = value.is_none(),
                    "cache put"
                );
                Ok(())
            }
            Err(e) => Err(self.store_failure("SET", pool, &store_key, e)),
        }
    }

    fn store_failure(&self, op: &str, pool: &P, store_key: &[u8], e: CacheError) -> CacheError {
        self.stats.error();
        tracing::warn!(
            op,
            pool = %pool.describe(),
            key = %printable(store_key),
            error = %e,
            "store operation failed"
        );
        e
    }
}

#[async_trait]
impl<K, V, P> Cache<K, V> for RemoteCache<K, V, P>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    P: ConnectionPool,
{
    async fn lookup(&self, key: &K) -> CacheResult<Lookup<V>> {
        let store_key = self.encode_key(key)?;
        let pool = self.routes.read_pool();

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.store_get(&store_key).await
        }
        .await;

        let bytes = match result {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.miss();
                metrics::record_cache_miss();
                tracing::debug!(key = %printable(&store_key), "cache miss");
                return Ok(Lookup::Miss);
            }
            Err(e) => return Err(self.store_failure("GET", pool, &store_key, e)),
        };

        match self.decode_entry(&bytes) {
            Ok(lookup) => {
                self.stats.hit();
                metrics::record_cache_hit(&pool.describe());
                tracing::debug!(key = %printable(&store_key), pool = %pool.describe(), "cache hit");
                Ok(lookup)
            }
            Err(e) => {
                self.stats.error();
                tracing::warn!(key = %printable(&store_key), error = %e, "failed to decode cached entry");
                Err(e)
            }
        }
    }

    async fn put(&self, key: &K, value: &V, ttl: Option<Duration>) -> CacheResult<()> {
        self.write(key, Some(value), ttl).await
    }

    async fn put_null(&self, key: &K, ttl: Option<Duration>) -> CacheResult<()> {
        self.write(key, None, ttl).await
    }

    async fn remove(&self, key: &K) -> CacheResult<bool> {
        let store_key = self.encode_key(key)?;
        let pool = self.routes.write_pool();

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.store_delete(&store_key).await
        }
        .await;

        match result {
            Ok(removed) => {
                self.stats.remove();
                tracing::debug!(key = %printable(&store_key), removed, "cache remove");
                Ok(removed)
            }
            Err(e) => Err(self.store_failure("DEL", pool, &store_key, e)),
        }
    }

    async fn exists(&self, key: &K) -> CacheResult<bool> {
        let store_key = self.encode_key(key)?;
        let pool = self.routes.read_pool();

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.store_exists(&store_key).await
        }
        .await;

        result.map_err(|e| self.store_failure("EXISTS", pool, &store_key, e))
    }

    async fn ttl(&self, key: &K) -> CacheResult<Ttl> {
        let store_key = self.encode_key(key)?;
        let pool = self.routes.read_pool();

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.store_ttl(&store_key).await
        }
        .await;

        result.map_err(|e| self.store_failure("PTTL", pool, &store_key, e))
    }
}

fn printable(store_key: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(store_key)
}

/// Assembles a [`RemoteCache`].
///
/// A master pool, a key convertor and a value encoder/decoder are required;
/// `build` fails with `CacheError::Configuration` when any is missing.
///
/// ```ignore
/// let cache = RemoteCache::<String, Profile, _>::builder()
///     .pool(master)
///     .key_convertor(JsonKeyConvertor)
///     .value_codec(MsgPackValueCodec)
///     .key_prefix("profiles:")
///     .expire_after_write(Duration::from_secs(300))
///     .build()?;
/// ```
pub struct RemoteCacheBuilder<K, V, P> {
    master: Option<P>,
    replicas: Vec<P>,
    replica_weights: Option<Vec<u32>>,
    read_from_replica: bool,
    key_prefix: String,
    key_convertor: Option<Arc<dyn KeyConvertor<K>>>,
    value_encoder: Option<Arc<dyn ValueEncoder<V>>>,
    value_decoder: Option<Arc<dyn ValueDecoder<V>>>,
    expire_after_write: Option<Duration>,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, P> Default for RemoteCacheBuilder<K, V, P> {
    fn default() -> Self {
        Self {
            master: None,
            replicas: Vec::new(),
            replica_weights: None,
            read_from_replica: false,
            key_prefix: String::new(),
            key_convertor: None,
            value_encoder: None,
            value_decoder: None,
            expire_after_write: None,
            _marker: PhantomData,
        }
    }
}

impl<K, V, P> RemoteCacheBuilder<K, V, P>
where
    P: ConnectionPool,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Master pool; target of all writes.
    pub fn pool(mut self, pool: P) -> Self {
        self.master = Some(pool);
        self
    }

    /// Replica pools used for reads when replica reads are enabled.
    pub fn replica_pools(mut self, pools: impl IntoIterator<Item = P>) -> Self {
        self.replicas = pools.into_iter().collect();
        self
    }

    /// Read weights, one per replica pool. Defaults to equal weights.
    pub fn replica_weights(mut self, weights: impl IntoIterator<Item = u32>) -> Self {
        self.replica_weights = Some(weights.into_iter().collect());
        self
    }

    pub fn read_from_replica(mut self, enabled: bool) -> Self {
        self.read_from_replica = enabled;
        self
    }

    /// Namespace prepended to every store key.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn key_convertor(mut self, convertor: impl KeyConvertor<K> + 'static) -> Self {
        self.key_convertor = Some(Arc::new(convertor));
        self
    }

    /// Set or clear the key convertor.
    pub fn key_convertor_arc(mut self, convertor: Option<Arc<dyn KeyConvertor<K>>>) -> Self {
        self.key_convertor = convertor;
        self
    }

    pub fn value_encoder(mut self, encoder: impl ValueEncoder<V> + 'static) -> Self {
        self.value_encoder = Some(Arc::new(encoder));
        self
    }

    pub fn value_decoder(mut self, decoder: impl ValueDecoder<V> + 'static) -> Self {
        self.value_decoder = Some(Arc::new(decoder));
        self
    }

    /// Use one codec as both encoder and decoder.
    pub fn value_codec<C>(self, codec: C) -> Self
    where
        C: ValueEncoder<V> + ValueDecoder<V> + Clone + 'static,
    {
        self.value_encoder(codec.clone()).value_decoder(codec)
    }

    /// Default TTL for `put` calls that do not pass one.
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Apply the codec, prefix, expiry and replica-read settings.
    pub fn with_settings(mut self, settings: &CacheSettings) -> Self
    where
        K: Serialize + 'static,
        V: Serialize + DeserializeOwned + 'static,
    {
        let (encoder, decoder) = settings.value_codec.resolve::<V>();
        self.key_prefix = settings.key_prefix.clone();
        self.key_convertor = settings.key_convertor.resolve::<K>();
        self.value_encoder = Some(encoder);
        self.value_decoder = Some(decoder);
        self.expire_after_write = settings.expire_after_write();
        self.read_from_replica = settings.read_from_replica;
        self
    }

    /// Validate the configuration and build the cache.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` when the master pool, key
    /// convertor, value encoder or decoder is missing, when replica weights
    /// do not match the replica pools or are zero, or when the default TTL is
    /// zero.
    pub fn build(self) -> CacheResult<RemoteCache<K, V, P>> {
        let master = self
            .master
            .ok_or_else(|| CacheError::configuration("a master pool is required"))?;
        let key_convertor = self
            .key_convertor
            .ok_or_else(|| CacheError::configuration("key convertor is not configured"))?;
        let value_encoder = self
            .value_encoder
            .ok_or_else(|| CacheError::configuration("value encoder is not configured"))?;
        let value_decoder = self
            .value_decoder
            .ok_or_else(|| CacheError::configuration("value decoder is not configured"))?;

        if self.expire_after_write.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::configuration(
                "expire_after_write must be greater than zero",
            ));
        }

        let weights = match self.replica_weights {
            Some(weights) => {
                if weights.len() != self.replicas.len() {
                    return Err(CacheError::configuration(format!(
                        "{} replica weights given for {} replica pools",
                        weights.len(),
                        self.replicas.len()
                    )));
                }
                if weights.contains(&0) {
                    return Err(CacheError::configuration(
                        "replica weights must be positive",
                    ));
                }
                weights
            }
            None => vec![1; self.replicas.len()],
        };

        if self.read_from_replica && self.replicas.is_empty() {
            tracing::warn!("read_from_replica is enabled but no replica pools are configured; reads go to the master");
        }

        let replicas = self
            .replicas
            .into_iter()
            .zip(weights)
            .map(|(pool, weight)| WeightedPool::new(pool, weight))
            .collect();

        tracing::debug!(
            master = %master.describe(),
            key_prefix = %self.key_prefix,
            read_from_replica = self.read_from_replica,
            "remote cache built"
        );

        Ok(RemoteCache {
            routes: RouteSet::new(master, replicas, self.read_from_replica),
            key_prefix: self.key_prefix,
            key_convertor,
            value_encoder,
            value_decoder,
            expire_after_write: self.expire_after_write,
            stats: StatsCounters::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IdentityKeyConvertor, JsonKeyConvertor, JsonValueCodec, MsgPackValueCodec};
    use crate::memory::MemoryPool;

    fn cache(pool: &MemoryPool, prefix: &str) -> RemoteCache<String, String, MemoryPool> {
        RemoteCache::builder()
            .pool(pool.clone())
            .key_convertor(IdentityKeyConvertor)
            .value_codec(MsgPackValueCodec)
            .key_prefix(prefix)
            .build()
            .expect("valid configuration")
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let pool = MemoryPool::new("master");
        let cache = cache(&pool, "t:");
        let key = "K1".to_string();

        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(!cache.exists(&key).await.unwrap());
        assert_eq!(cache.ttl(&key).await.unwrap(), Ttl::Missing);

        cache.put(&key, &"V1".to_string(), None).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some("V1".to_string()));
        assert!(cache.exists(&key).await.unwrap());
        assert_eq!(cache.ttl(&key).await.unwrap(), Ttl::Persistent);

        assert!(cache.remove(&key).await.unwrap());
        assert!(!cache.remove(&key).await.unwrap());
        assert_eq!(cache.get(&key).await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.removes, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_keys_are_prefixed() {
        let pool = MemoryPool::new("master");
        let cache = cache(&pool, "users:");
        cache
            .put(&"42".to_string(), &"Ada".to_string(), None)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert!(conn.store_exists(b"users:42").await.unwrap());
        assert!(!conn.store_exists(b"42").await.unwrap());
        assert_eq!(cache.encode_key(&"42".to_string()).unwrap(), b"users:42");
    }

    #[tokio::test]
    async fn test_null_marker_round_trip() {
        let pool = MemoryPool::new("master");
        let cache = cache(&pool, "n:");
        let key = "absent".to_string();

        cache.put_null(&key, None).await.unwrap();
        assert_eq!(cache.lookup(&key).await.unwrap(), Lookup::Null);
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_per_call_ttl_overrides_default() {
        let pool = MemoryPool::new("master");
        let cache: RemoteCache<String, String, MemoryPool> = RemoteCache::builder()
            .pool(pool)
            .key_convertor(JsonKeyConvertor)
            .value_codec(JsonValueCodec)
            .expire_after_write(Duration::from_secs(60))
            .build()
            .unwrap();

        let key = "k".to_string();
        cache.put(&key, &"v".to_string(), None).await.unwrap();
        let remaining = cache.ttl(&key).await.unwrap().remaining().unwrap();
        assert!(remaining > Duration::from_secs(50));

        cache
            .put(&key, &"v".to_string(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let remaining = cache.ttl(&key).await.unwrap().remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));

        let err = cache
            .put(&key, &"v".to_string(), Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_decode_error() {
        let pool = MemoryPool::new("master");
        let cache = cache(&pool, "c:");

        pool.insert_raw("c:bad", vec![VALUE_TAG, 0xde, 0xad]);
        let err = cache.get(&"bad".to_string()).await.unwrap_err();
        assert!(err.is_decode());

        pool.insert_raw("c:tag", vec![7u8]);
        let err = cache.get(&"tag".to_string()).await.unwrap_err();
        assert!(err.is_decode());

        // The undecodable entry stays in the store.
        assert!(cache.exists(&"bad".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_is_reported() {
        let pool = MemoryPool::new("master");
        let cache = cache(&pool, "o:");
        pool.set_available(false);

        let err = cache.get(&"k".to_string()).await.unwrap_err();
        assert!(err.is_store_unavailable());
        let err = cache
            .put(&"k".to_string(), &"v".to_string(), None)
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert_eq!(cache.stats().errors, 2);
    }

    #[test]
    fn test_build_requires_key_convertor() {
        let err = RemoteCache::<String, String, MemoryPool>::builder()
            .pool(MemoryPool::new("master"))
            .value_codec(JsonValueCodec)
            .build()
            .err()
            .expect("missing convertor must fail");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("key convertor"));
    }

    #[test]
    fn test_default_settings_do_not_pick_a_key_convertor() {
        let err = RemoteCache::<String, String, MemoryPool>::builder()
            .pool(MemoryPool::new("master"))
            .with_settings(&CacheSettings::default())
            .build()
            .err()
            .expect("default settings must not build");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("key convertor"));
    }

    #[test]
    fn test_build_requires_value_codec_and_pool() {
        let err = RemoteCache::<String, String, MemoryPool>::builder()
            .pool(MemoryPool::new("master"))
            .key_convertor(JsonKeyConvertor)
            .value_encoder(JsonValueCodec)
            .build()
            .err()
            .expect("missing decoder must fail");
        assert!(err.to_string().contains("value decoder"));

        let err = RemoteCache::<String, String, MemoryPool>::builder()
            .key_convertor(JsonKeyConvertor)
            .value_codec(JsonValueCodec)
            .build()
            .err()
            .expect("missing pool must fail");
        assert!(err.to_string().contains("master pool"));
    }

    #[test]
    fn test_build_rejects_invalid_weights() {
        let master = MemoryPool::new("master");
        let replicas = vec![
            MemoryPool::replica_of(&master, "r1"),
            MemoryPool::replica_of(&master, "r2"),
        ];

        let err = RemoteCache::<String, String, MemoryPool>::builder()
            .pool(master.clone())
            .replica_pools(replicas.clone())
            .replica_weights([1])
            .key_convertor(JsonKeyConvertor)
            .value_codec(JsonValueCodec)
            .build()
            .err()
            .expect("weight count mismatch must fail");
        assert!(err.is_configuration());

        let err = RemoteCache::<String, String, MemoryPool>::builder()
            .pool(master)
            .replica_pools(replicas)
            .replica_weights([1, 0])
            .key_convertor(JsonKeyConvertor)
            .value_codec(JsonValueCodec)
            .build()
            .err()
            .expect("zero weight must fail");
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn test_unwrap_returns_master_pool() {
        let master = MemoryPool::new("master");
        let cache = cache(&master, "u:");

        let unwrapped = cache.unwrap::<MemoryPool>().unwrap();
        assert!(unwrapped.same_pool(&master));

        let err = cache.unwrap::<String>().unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
    }
}
