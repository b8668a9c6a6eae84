//! Store statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one store
#[derive(Debug, Default)]
pub struct StoreStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl StoreStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful delete
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total writes
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Get total deletes
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters, with the store's current size
    pub fn snapshot(&self, size: usize) -> StatsSnapshot {
        let hits = self.hits();
        let misses = self.misses();
        StatsSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            sets: self.sets(),
            deletes: self.deletes(),
            evictions: self.evictions(),
            size,
        }
    }
}

/// Serializable view of [`StoreStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry)
    pub misses: u64,
    /// `hits / (hits + misses)`
    pub hit_rate: f64,
    /// Writes
    pub sets: u64,
    /// Successful deletes
    pub deletes: u64,
    /// Capacity evictions
    pub evictions: u64,
    /// Resident entries
    pub size: usize,
}

/// `hits / (hits + misses)`, 0.0 when nothing was looked up
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StoreStats::new();

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.hit_rate(), 2.0 / 3.0);
    }

    #[test]
    fn test_stats_reset() {
        let stats = StoreStats::new();

        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.evictions(), 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let stats = StoreStats::new();
        stats.record_hit();
        stats.record_set();

        let json = serde_json::to_value(stats.snapshot(3)).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["hitRate"], 1.0);
        assert_eq!(json["sets"], 1);
        assert_eq!(json["size"], 3);
    }
}
