//! Cache metrics.
//!
//! Counters are emitted through the `metrics` facade (a no-op until the host
//! process installs a recorder) and mirrored in per-cache [`CacheStats`].

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "octocache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "octocache_misses_total";
    pub const CACHE_LOADS_TOTAL: &str = "octocache_loads_total";
    pub const CACHE_LOAD_FAILURES_TOTAL: &str = "octocache_load_failures_total";
    pub const CACHE_REFRESHES_TOTAL: &str = "octocache_refreshes_total";
    pub const CACHE_REFRESH_FAILURES_TOTAL: &str = "octocache_refresh_failures_total";
}

/// Record a cache hit on the pool described by `pool`.
pub fn record_cache_hit(pool: &str) {
    counter!(names::CACHE_HITS_TOTAL, "pool" => pool.to_string()).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a completed loader invocation.
pub fn record_load(success: bool) {
    if success {
        counter!(names::CACHE_LOADS_TOTAL).increment(1);
    } else {
        counter!(names::CACHE_LOAD_FAILURES_TOTAL).increment(1);
    }
}

/// Record a completed background refresh.
pub fn record_refresh(success: bool) {
    if success {
        counter!(names::CACHE_REFRESHES_TOTAL).increment(1);
    } else {
        counter!(names::CACHE_REFRESH_FAILURES_TOTAL).increment(1);
    }
}

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a value or absence marker.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Writes (values and absence markers).
    pub puts: u64,
    /// Removals.
    pub removes: u64,
    /// Operations that failed with an error.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removes: AtomicU64,
    errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);

        let counters = StatsCounters::default();
        counters.hit();
        counters.hit();
        counters.hit();
        counters.miss();
        let stats = counters.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
    }
}
