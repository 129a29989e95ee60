//! In-memory store pool backed by DashMap.
//!
//! Used for local (single-instance) mode and in tests. Pools created with
//! [`MemoryPool::replica_of`] share the master's data, which stands in for
//! store-side replication, but keep their own identity and counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::pool::{ConnectionPool, StoreConnection, Ttl};
use crate::{CacheError, CacheResult};

/// A stored entry with optional expiry.
#[derive(Clone, Debug)]
struct StoredEntry {
    data: Arc<Vec<u8>>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data: Arc::new(data),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Store = Arc<DashMap<Vec<u8>, StoredEntry>>;

/// In-memory [`ConnectionPool`].
///
/// Cloning yields a handle to the same pool (same name, data and counters).
#[derive(Clone)]
pub struct MemoryPool {
    name: Arc<str>,
    store: Store,
    acquired: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl MemoryPool {
    /// Create a pool with an empty store.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(DashMap::new()),
            acquired: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a distinct pool that reads and writes `master`'s data.
    pub fn replica_of(master: &MemoryPool, name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            store: Arc::clone(&master.store),
            acquired: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of connections handed out so far.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Simulate an outage: while unavailable, `acquire` fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.store.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Write raw bytes, bypassing any cache codec.
    pub fn insert_raw(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.store
            .insert(key.into(), StoredEntry::new(value.into(), None));
    }

    /// Returns `true` if both handles share the same pool identity.
    pub fn same_pool(&self, other: &MemoryPool) -> bool {
        Arc::ptr_eq(&self.acquired, &other.acquired)
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("name", &self.name)
            .field("acquired", &self.acquired())
            .finish()
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> CacheResult<MemoryConnection> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(CacheError::store_unavailable(format!(
                "memory pool '{}' is unavailable",
                self.name
            )));
        }
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryConnection {
            store: Arc::clone(&self.store),
        })
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// Connection handed out by [`MemoryPool`].
pub struct MemoryConnection {
    store: Store,
}

impl MemoryConnection {
    /// Live entry for `key`, removing it if it has expired.
    fn live(&self, key: &[u8]) -> Option<StoredEntry> {
        let now = Instant::now();
        let entry = self.store.get(key)?;
        if !entry.is_expired(now) {
            return Some(entry.clone());
        }
        drop(entry);
        self.store.remove_if(key, |_, e| e.is_expired(now));
        None
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn store_get(&mut self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.live(key).map(|e| e.data.as_ref().clone()))
    }

    async fn store_set(
        &mut self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.store
            .insert(key.to_vec(), StoredEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn store_delete(&mut self, key: &[u8]) -> CacheResult<bool> {
        let existed = self.live(key).is_some();
        self.store.remove(key);
        Ok(existed)
    }

    async fn store_exists(&mut self, key: &[u8]) -> CacheResult<bool> {
        Ok(self.live(key).is_some())
    }

    async fn store_ttl(&mut self, key: &[u8]) -> CacheResult<Ttl> {
        Ok(match self.live(key) {
            None => Ttl::Missing,
            Some(StoredEntry {
                expires_at: None, ..
            }) => Ttl::Persistent,
            Some(StoredEntry {
                expires_at: Some(at),
                ..
            }) => Ttl::Remaining(at.saturating_duration_since(Instant::now())),
        })
    }
}
