//! Two-level cache: a small fast tier in front of a larger slower one

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shelfstore::{CacheStore, Error, MemoryStore, Result, StatsSnapshot};
use tracing::{debug, warn};

/// Per-tier counter snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierStats {
    /// Fast tier
    pub l1: StatsSnapshot,
    /// Shared tier
    pub l2: StatsSnapshot,
}

/// One logical cache over two stores with read-through promotion.
///
/// Reads try L1, then L2; an L2 hit is copied into L1. Writes go to L1 then
/// L2. A tier that is unavailable or fails is skipped; an operation only
/// fails when no tier could serve it.
pub struct TieredCache {
    l1: Arc<dyn CacheStore>,
    l2: Arc<dyn CacheStore>,
}

impl TieredCache {
    /// Compose two stores
    pub fn new(l1: Arc<dyn CacheStore>, l2: Arc<dyn CacheStore>) -> Self {
        Self { l1, l2 }
    }

    /// Two in-process tiers
    pub fn in_memory(
        l1_capacity: usize,
        l1_ttl: Duration,
        l2_capacity: usize,
        l2_ttl: Duration,
    ) -> Self {
        Self::new(
            Arc::new(MemoryStore::new("l1", l1_capacity, l1_ttl)),
            Arc::new(MemoryStore::new("l2", l2_capacity, l2_ttl)),
        )
    }

    /// Fast tier
    pub fn l1(&self) -> &Arc<dyn CacheStore> {
        &self.l1
    }

    /// Shared tier
    pub fn l2(&self) -> &Arc<dyn CacheStore> {
        &self.l2
    }

    /// Both tiers, L1 first
    pub fn tiers(&self) -> [&Arc<dyn CacheStore>; 2] {
        [&self.l1, &self.l2]
    }

    /// True while at least one tier accepts requests
    pub fn is_available(&self) -> bool {
        self.l1.is_available() || self.l2.is_available()
    }

    /// Read through L1 then L2, promoting L2 hits into L1
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let l1_failure = match guarded(&self.l1) {
            Ok(()) => match self.l1.get(key).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => None,
                Err(e) => Some(tier_failed(&self.l1, "get", key, e)),
            },
            Err(e) => Some(e),
        };

        let l2_result = match guarded(&self.l2) {
            Ok(()) => self.l2.get(key).await,
            Err(e) => Err(e),
        };

        match l2_result {
            Ok(Some(value)) => {
                self.promote(key, &value).await;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                let e = tier_failed(&self.l2, "get", key, e);
                match l1_failure {
                    Some(_) => Err(e),
                    None => Ok(None),
                }
            }
        }
    }

    /// Check both tiers for a live key
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut failures = 0;
        for tier in self.tiers() {
            if let Err(e) = guarded(tier) {
                failures += 1;
                if failures == 2 {
                    return Err(e);
                }
                continue;
            }
            match tier.exists(key).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    let e = tier_failed(tier, "exists", key, e);
                    failures += 1;
                    if failures == 2 {
                        return Err(e);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Write through both tiers; each uses its own default TTL unless `ttl` is set
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut last_error = None;
        let mut stored = false;

        let l2_value = value.clone();
        for (tier, value) in [(&self.l1, value), (&self.l2, l2_value)] {
            if let Err(e) = guarded(tier) {
                last_error = Some(e);
                continue;
            }
            match tier.set(key, value, ttl).await {
                Ok(()) => stored = true,
                Err(e) => last_error = Some(tier_failed(tier, "set", key, e)),
            }
        }

        match (stored, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove a key from both tiers, returning whether any tier held it
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut last_error = None;
        let mut answered = false;
        let mut removed = false;

        for tier in self.tiers() {
            if let Err(e) = guarded(tier) {
                last_error = Some(e);
                continue;
            }
            match tier.delete(key).await {
                Ok(hit) => {
                    answered = true;
                    removed |= hit;
                }
                Err(e) => last_error = Some(tier_failed(tier, "delete", key, e)),
            }
        }

        match (answered, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(removed),
        }
    }

    /// Empty both tiers
    pub async fn clear(&self) -> Result<()> {
        let mut last_error = None;
        let mut cleared = false;

        for tier in self.tiers() {
            if let Err(e) = guarded(tier) {
                last_error = Some(e);
                continue;
            }
            match tier.clear().await {
                Ok(()) => cleared = true,
                Err(e) => last_error = Some(tier_failed(tier, "clear", "*", e)),
            }
        }

        match (cleared, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Cache failures count as a miss. Errors from `fetcher` are returned
    /// unchanged. Concurrent misses on one key are not coalesced.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetcher: F,
    ) -> std::result::Result<Vec<u8>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
    {
        match self.get(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "cache read failed, fetching"),
        }

        let value = fetcher().await?;
        if let Err(e) = self.set(key, value.clone(), ttl).await {
            warn!(key, error = %e, "could not cache fetched value");
        }
        Ok(value)
    }

    /// Increment a counter.
    ///
    /// Counters live in L2 so every process sharing that tier sees one
    /// value; L1's copy is dropped. Without a reachable L2 the counter is
    /// kept in L1.
    pub async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        if self.l2.is_available() {
            match self.l2.incr(key, ttl).await {
                Ok(value) => {
                    if self.l1.is_available() {
                        if let Err(e) = self.l1.delete(key).await {
                            tier_failed(&self.l1, "incr", key, e);
                        }
                    }
                    return Ok(value);
                }
                Err(e) if e.is_connection() => {
                    tier_failed(&self.l2, "incr", key, e);
                }
                Err(e) => return Err(e),
            }
        }

        guarded(&self.l1)?;
        self.l1.incr(key, ttl).await
    }

    /// Sweep expired entries from both tiers
    pub async fn cleanup(&self) -> usize {
        let mut removed = 0;
        for tier in self.tiers() {
            if guarded(tier).is_err() {
                continue;
            }
            match tier.cleanup().await {
                Ok(n) => removed += n,
                Err(e) => {
                    tier_failed(tier, "cleanup", "*", e);
                }
            }
        }
        removed
    }

    /// Counter snapshots; an unreachable tier reports zeros
    pub async fn stats(&self) -> TierStats {
        TierStats {
            l1: tier_stats(&self.l1).await,
            l2: tier_stats(&self.l2).await,
        }
    }

    async fn promote(&self, key: &str, value: &[u8]) {
        if !self.l1.is_available() {
            return;
        }
        match self.l1.set(key, value.to_vec(), None).await {
            Ok(()) => debug!(key, "promoted entry into l1"),
            Err(e) => {
                tier_failed(&self.l1, "promote", key, e);
            }
        }
    }
}

fn guarded(tier: &Arc<dyn CacheStore>) -> Result<()> {
    if tier.is_available() {
        Ok(())
    } else {
        debug!(tier = tier.name(), "skipping unavailable tier");
        Err(Error::Unavailable(tier.name().to_string()))
    }
}

fn tier_failed(tier: &Arc<dyn CacheStore>, op: &str, key: &str, error: Error) -> Error {
    warn!(tier = tier.name(), op, key, error = %error, "cache tier operation failed");
    error
}

async fn tier_stats(tier: &Arc<dyn CacheStore>) -> StatsSnapshot {
    if !tier.is_available() {
        return StatsSnapshot::default();
    }
    match tier.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tier_failed(tier, "stats", "*", e);
            StatsSnapshot::default()
        }
    }
}
