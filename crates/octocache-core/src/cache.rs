//! The cache trait shared by the base cache and its decorators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::CacheResult;
use crate::pool::Ttl;

/// Outcome of a raw cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// A value is cached under the key.
    Hit(V),
    /// The key is cached as a known absence (see [`Cache::put_null`]).
    Null,
    /// Nothing is cached under the key.
    Miss,
}

impl<V> Lookup<V> {
    /// The cached value, if any. Both `Null` and `Miss` become `None`.
    pub fn into_option(self) -> Option<V> {
        match self {
            Self::Hit(v) => Some(v),
            Self::Null | Self::Miss => None,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Basic cache operations.
///
/// Implemented by [`RemoteCache`](crate::RemoteCache) and by the decorators
/// that wrap it, so decorators stack in any order. Absence is reported as
/// `Ok(None)`; errors are reserved for real failures.
#[async_trait]
pub trait Cache<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Look up `key`, distinguishing a cached absence from a miss.
    async fn lookup(&self, key: &K) -> CacheResult<Lookup<V>>;

    /// Get the value cached under `key`.
    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        Ok(self.lookup(key).await?.into_option())
    }

    /// Store `value` under `key`.
    ///
    /// `ttl` overrides the cache's default expiration for this entry.
    async fn put(&self, key: &K, value: &V, ttl: Option<Duration>) -> CacheResult<()>;

    /// Store an explicit absence marker under `key`.
    async fn put_null(&self, key: &K, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove `key`, returning whether anything was removed.
    async fn remove(&self, key: &K) -> CacheResult<bool>;

    /// Check whether anything (value or absence marker) is cached under `key`.
    async fn exists(&self, key: &K) -> CacheResult<bool>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &K) -> CacheResult<Ttl>;
}

#[async_trait]
impl<K, V, C> Cache<K, V> for Arc<C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Cache<K, V> + ?Sized,
{
    async fn lookup(&self, key: &K) -> CacheResult<Lookup<V>> {
        (**self).lookup(key).await
    }

    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &K, value: &V, ttl: Option<Duration>) -> CacheResult<()> {
        (**self).put(key, value, ttl).await
    }

    async fn put_null(&self, key: &K, ttl: Option<Duration>) -> CacheResult<()> {
        (**self).put_null(key, ttl).await
    }

    async fn remove(&self, key: &K) -> CacheResult<bool> {
        (**self).remove(key).await
    }

    async fn exists(&self, key: &K) -> CacheResult<bool> {
        (**self).exists(key).await
    }

    async fn ttl(&self, key: &K) -> CacheResult<Ttl> {
        (**self).ttl(key).await
    }
}
