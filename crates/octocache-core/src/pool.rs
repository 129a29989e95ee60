//! Traits for the remote store connection pools a cache is built on.
//!
//! The cache never creates, closes or reconfigures a pool. Pool
//! implementations own their own wait policy, timeouts and retries.

use std::time::Duration;

use async_trait::async_trait;

use crate::CacheResult;

/// Remaining lifetime of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No such key.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after the given duration.
    Remaining(Duration),
}

impl Ttl {
    /// Returns `true` unless the key is missing.
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// Remaining lifetime, if the key exists and expires.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Remaining(d) => Some(*d),
            _ => None,
        }
    }
}

/// A live connection to one store endpoint or topology.
///
/// Store errors are reported as [`CacheError::StoreUnavailable`](crate::CacheError::StoreUnavailable);
/// a missing key is `Ok(None)` / [`Ttl::Missing`].
#[async_trait]
pub trait StoreConnection: Send {
    async fn store_get(&mut self, key: &[u8]) -> CacheResult<Option<Vec<u8>>>;

    /// Write `value` under `key`. `None` means no expiration.
    async fn store_set(&mut self, key: &[u8], value: &[u8], ttl: Option<Duration>)
    -> CacheResult<()>;

    /// Delete `key`, returning whether it existed.
    async fn store_delete(&mut self, key: &[u8]) -> CacheResult<bool>;

    async fn store_exists(&mut self, key: &[u8]) -> CacheResult<bool>;

    async fn store_ttl(&mut self, key: &[u8]) -> CacheResult<Ttl>;
}

/// A pool that can hand out live connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: StoreConnection;

    /// Acquire a connection, waiting according to the pool's own policy.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::StoreUnavailable` if the pool is exhausted or a
    /// connection cannot be established.
    async fn acquire(&self) -> CacheResult<Self::Connection>;

    /// Short description used in logs.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
