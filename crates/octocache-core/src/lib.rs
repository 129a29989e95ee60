//! # octocache-core
//!
//! Layered caching over remote key/value stores.
//!
//! ## Overview
//!
//! A cache is built in layers, each implementing [`Cache`]:
//!
//! - [`RemoteCache`] turns typed keys and values into bytes (key prefix, key
//!   convertor, value codec) and talks to a master pool plus optional
//!   weighted read replicas.
//! - [`LoadingCache`] fills misses from a [`CacheLoader`], with at most one
//!   concurrent load per key.
//! - [`RefreshCache`] keeps recently read keys warm by reloading them in the
//!   background.
//!
//! Store access goes through the [`ConnectionPool`] trait. [`MemoryPool`] is
//! an in-process implementation; the `octocache-redis` crate provides Redis.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use octocache_core::prelude::*;
//!
//! let base = RemoteCache::<String, User, _>::builder()
//!     .pool(MemoryPool::new("master"))
//!     .key_prefix("users:")
//!     .key_convertor(IdentityKeyConvertor)
//!     .value_codec(MsgPackValueCodec)
//!     .expire_after_write(Duration::from_secs(300))
//!     .build()?;
//!
//! let users = LoadingCache::new(
//!     base,
//!     loader_fn(|id: String| async move { fetch_user(&id).await }),
//!     LoadingConfig::default(),
//! );
//!
//! let user = users.get(&"42".to_string()).await?;
//! ```

pub mod cache;
pub mod codec;
pub mod config;
mod error;
pub mod loading;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod refresh;
pub mod remote;
pub mod router;

pub use cache::{Cache, Lookup};
pub use codec::{
    IdentityKeyConvertor, JsonKeyConvertor, JsonValueCodec, KeyConvertor, KeyConvertorKind,
    MsgPackValueCodec, ValueCodecKind, ValueDecoder, ValueEncoder,
};
pub use config::{CacheSettings, RefreshSettings};
pub use error::{CacheError, ErrorCategory};
pub use loading::{CacheLoader, FnLoader, LoadingCache, LoadingConfig, loader_fn};
pub use memory::{MemoryConnection, MemoryPool};
pub use metrics::CacheStats;
pub use pool::{ConnectionPool, StoreConnection, Ttl};
pub use refresh::{RefreshCache, RefreshConfig};
pub use remote::{RemoteCache, RemoteCacheBuilder};
pub use router::{RouteSet, WeightedPool, random_index};

/// Type alias for a cache result.
pub type CacheResult<T> = Result<T, CacheError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octocache_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::{Cache, Lookup};
    pub use crate::codec::{
        IdentityKeyConvertor, JsonKeyConvertor, JsonValueCodec, KeyConvertorKind,
        MsgPackValueCodec, ValueCodecKind,
    };
    pub use crate::config::{CacheSettings, RefreshSettings};
    pub use crate::error::{CacheError, ErrorCategory};
    pub use crate::loading::{CacheLoader, LoadingCache, LoadingConfig, loader_fn};
    pub use crate::memory::MemoryPool;
    pub use crate::pool::{ConnectionPool, Ttl};
    pub use crate::refresh::{RefreshCache, RefreshConfig};
    pub use crate::remote::RemoteCache;
    pub use crate::CacheResult;
}
