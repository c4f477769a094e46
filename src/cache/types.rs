//! Cache statistics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters describing cache behaviour since start-up
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Calls answered from a fresh entry
    pub hits: u64,

    /// Calls that needed a fetch (started one or joined one)
    pub misses: u64,

    /// Misses that joined a fetch already in flight
    pub coalesced: u64,

    /// Fetches started against the gateway
    pub fetches: u64,

    /// Fetches that ended in an error
    pub fetch_failures: u64,

    /// Entries evicted because `max_entries` was reached
    pub evictions_lru: u64,

    /// Entries dropped by `purge_expired`
    pub purges: u64,

    /// Entries removed by explicit invalidation
    pub invalidations: u64,

    /// In-flight fetches whose result was discarded by invalidation
    pub detached_fetches: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Approximate size of cached rows in bytes
    pub size_bytes: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Gateway calls saved by coalescing and hits
    pub fn fetches_saved(&self) -> u64 {
        self.hits + self.coalesced
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, coalesced: {}, hit_rate: {:.2}%, fetches: {}, failures: {}, detached: {}, entries: {}, size: {} bytes }}",
            self.hits,
            self.misses,
            self.coalesced,
            self.hit_rate(),
            self.fetches,
            self.fetch_failures,
            self.detached_fetches,
            self.entries,
            self.size_bytes
        )
    }
}
