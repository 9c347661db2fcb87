//! Cache statistics tracking and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Snapshot of cache statistics for monitoring and debugging.
#[derive(Debug, Clone)]
pub struct CacheStats {
    // Lookups
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,

    // Driver traffic
    pub fills: u64,
    pub fill_failures: u64,
    pub write_backs: u64,
    pub write_back_failures: u64,

    // Reclaim
    pub evictions: u64,

    // Occupancy at snapshot time
    pub resident_bytes: usize,
    pub resident_blocks: usize,
    pub budget_bytes: usize,

    pub created_at: Instant,
}

impl CacheStats {
    /// Fraction of lookups served without a fill of their own (0.0 to 1.0).
    ///
    /// Coalesced requests count as hits: they waited on someone else's fill.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Fraction of the budget in use. Can exceed 1.0 while every block is pinned.
    pub fn utilization(&self) -> f64 {
        if self.budget_bytes == 0 {
            if self.resident_bytes == 0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            self.resident_bytes as f64 / self.budget_bytes as f64
        }
    }

    /// Time since the cache was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// Lock-free counters updated on the hot path.
#[derive(Debug)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fills: AtomicU64,
    fill_failures: AtomicU64,
    write_backs: AtomicU64,
    write_back_failures: AtomicU64,
    evictions: AtomicU64,
    created_at: Instant,
}

impl CacheCounters {
    pub(crate) fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            fills: AtomicU64::new(0),
            fill_failures: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
            write_back_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fill(&self) {
        self.fills.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fill_failure(&self) {
        self.fill_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_back_failure(&self) {
        self.write_back_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        resident_bytes: usize,
        resident_blocks: usize,
        budget_bytes: usize,
    ) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            fill_failures: self.fill_failures.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident_bytes,
            resident_blocks,
            budget_bytes,
            created_at: self.created_at,
        }
    }
}
