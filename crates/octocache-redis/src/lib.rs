//! # octocache-redis
//!
//! Redis backend for `octocache-core`: a [`RedisPool`] implementing
//! `ConnectionPool` over `deadpool-redis`, file/env settings, and [`connect`]
//! to build a `RemoteCache` from them.
//!
//! ```ignore
//! let settings = octocache_redis::load_settings(Some("octocache.toml"))?;
//! let cache = octocache_redis::connect::<String, Session>(&settings).await?;
//! ```

mod pool;
mod settings;

use std::time::Duration;

use octocache_core::{CacheError, CacheResult, ConnectionPool, RemoteCache};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use pool::{RedisConnection, RedisPool};
pub use settings::{
    DEFAULT_SETTINGS_PATH, ENV_PREFIX, RedisSettings, ReplicaSettings, load_settings,
};

/// Build a cache over the master and replica pools described by `settings`.
///
/// Verifies the master is reachable before returning. Replica pools connect
/// lazily on first read.
///
/// # Errors
///
/// Returns `CacheError::Configuration` for invalid settings and
/// `CacheError::StoreUnavailable` if the master cannot be reached.
pub async fn connect<K, V>(settings: &RedisSettings) -> CacheResult<RemoteCache<K, V, RedisPool>>
where
    K: Serialize + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    settings.validate().map_err(CacheError::configuration)?;
    let timeout = Duration::from_millis(settings.timeout_ms);

    let master = RedisPool::from_url(&settings.url, settings.pool_size, timeout)?;
    tracing::info!(url = %master.endpoint(), "Connecting to Redis");

    // Fail fast on an unreachable master.
    drop(master.acquire().await?);
    tracing::info!(url = %master.endpoint(), "Connected to Redis");

    let replicas = settings
        .replicas
        .iter()
        .map(|r| RedisPool::from_url(&r.url, settings.pool_size, timeout))
        .collect::<CacheResult<Vec<_>>>()?;

    let mut builder = RemoteCache::builder()
        .pool(master)
        .with_settings(&settings.cache);
    if !replicas.is_empty() {
        builder = builder
            .replica_weights(settings.replicas.iter().map(|r| r.weight))
            .replica_pools(replicas);
    }
    builder.build()
}
