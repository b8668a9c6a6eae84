//! Cache facade used by request handlers
//!
//! Wraps a [`TieredCache`] with typed JSON values, key prefixes, counters
//! and degraded-mode behaviour: when the backing tiers are unavailable or
//! fail, reads become misses and writes become no-ops. No infrastructure
//! error ever reaches the caller; only fetcher errors from
//! [`Cache::get_or_set`] propagate.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shelfstore::{hit_rate, CacheStore, Error, Pattern, StatsSnapshot};
use tracing::{debug, info, warn};

use crate::tiered::TieredCache;

/// Keys examined per scan page and deleted per batch in [`Cache::del_pattern`]
pub const DEFAULT_SCAN_BATCH: usize = 100;

/// Default L1 entry lifetime
pub const DEFAULT_L1_TTL: Duration = Duration::from_secs(300);

/// Default L2 entry lifetime
pub const DEFAULT_L2_TTL: Duration = Duration::from_secs(600);

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    /// Overrides each tier's default TTL
    pub ttl: Option<Duration>,
    /// Namespace; the stored key becomes `<prefix>:<key>`
    pub prefix: Option<String>,
}

impl CacheOptions {
    /// No TTL override, no prefix
    pub const NONE: CacheOptions = CacheOptions {
        ttl: None,
        prefix: None,
    };

    /// Options with a TTL override
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            prefix: None,
        }
    }

    /// Options with a key prefix
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            ttl: None,
            prefix: Some(prefix.into()),
        }
    }

    /// Set the TTL override
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{}:{}", prefix, key)),
            None => Cow::Borrowed(key),
        }
    }
}

#[derive(Debug, Default)]
struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl Metrics {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.sets, &self.deletes, &self.errors] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> OverallStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        OverallStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Facade-level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    /// Reads answered by any tier
    pub hits: u64,
    /// Reads answered by no tier
    pub misses: u64,
    /// `hits / (hits + misses)`
    pub hit_rate: f64,
    /// Successful writes
    pub sets: u64,
    /// Keys removed
    pub deletes: u64,
    /// Infrastructure failures absorbed
    pub errors: u64,
}

/// Stats for every tier plus the facade totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheReport {
    /// Fast tier
    pub l1: StatsSnapshot,
    /// Shared tier
    pub l2: StatsSnapshot,
    /// Facade totals
    pub overall: OverallStats,
}

/// Resilient typed cache API
pub struct Cache {
    tiers: TieredCache,
    metrics: Metrics,
    scan_batch: usize,
}

impl Cache {
    /// Wrap a tiered cache
    pub fn new(tiers: TieredCache) -> Self {
        Self {
            tiers,
            metrics: Metrics::default(),
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }

    /// Two in-process tiers with the default TTLs
    pub fn in_memory(l1_capacity: usize, l2_capacity: usize) -> Self {
        Self::new(TieredCache::in_memory(
            l1_capacity,
            DEFAULT_L1_TTL,
            l2_capacity,
            DEFAULT_L2_TTL,
        ))
    }

    /// Change the batch size used by [`Cache::del_pattern`]
    pub fn with_scan_batch(mut self, batch: usize) -> Self {
        self.scan_batch = batch.max(1);
        self
    }

    /// Underlying tiers
    pub fn tiers(&self) -> &TieredCache {
        &self.tiers
    }

    /// True while at least one tier accepts requests
    pub fn is_available(&self) -> bool {
        self.tiers.is_available()
    }

    /// Read and deserialize a value; any failure is a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> Option<T> {
        let key = options.key(key);
        if !self.ready("get", &key) {
            Metrics::bump(&self.metrics.misses, 1);
            return None;
        }

        let bytes = match self.tiers.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                Metrics::bump(&self.metrics.misses, 1);
                return None;
            }
            Err(e) => {
                self.absorb("get", &key, &e);
                Metrics::bump(&self.metrics.misses, 1);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                Metrics::bump(&self.metrics.hits, 1);
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cached value could not be deserialized");
                Metrics::bump(&self.metrics.errors, 1);
                Metrics::bump(&self.metrics.misses, 1);
                None
            }
        }
    }

    /// Serialize and write through every tier; failures are logged and skipped
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) {
        let key = options.key(key);
        if !self.ready("set", &key) {
            return;
        }

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "value could not be serialized, not cached");
                Metrics::bump(&self.metrics.errors, 1);
                return;
            }
        };

        match self.tiers.set(&key, bytes, options.ttl).await {
            Ok(()) => Metrics::bump(&self.metrics.sets, 1),
            Err(e) => self.absorb("set", &key, &e),
        }
    }

    /// Remove a key from every tier
    pub async fn delete(&self, key: &str, options: &CacheOptions) -> bool {
        let key = options.key(key);
        if !self.ready("delete", &key) {
            return false;
        }

        match self.tiers.delete(&key).await {
            Ok(removed) => {
                if removed {
                    Metrics::bump(&self.metrics.deletes, 1);
                }
                removed
            }
            Err(e) => {
                self.absorb("delete", &key, &e);
                false
            }
        }
    }

    /// Check for a live key in any tier
    pub async fn exists(&self, key: &str, options: &CacheOptions) -> bool {
        let key = options.key(key);
        if !self.ready("exists", &key) {
            return false;
        }

        match self.tiers.exists(&key).await {
            Ok(found) => found,
            Err(e) => {
                self.absorb("exists", &key, &e);
                false
            }
        }
    }

    /// Return the cached value, or run `fetcher`, cache its result and return it.
    ///
    /// Errors from `fetcher` are returned unchanged; cache failures only
    /// cost a refetch. Concurrent misses on one key may each run the fetcher.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key, options).await {
            return Ok(value);
        }

        let value = fetcher().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    /// Delete every key matching a glob pattern from every tier.
    ///
    /// Keys are enumerated a page at a time and deleted in batches, yielding
    /// to the scheduler between pages so other cache traffic keeps flowing.
    /// Returns the number of distinct keys removed.
    pub async fn del_pattern(&self, pattern: &str) -> usize {
        if let Err(e) = Pattern::parse(pattern) {
            warn!(pattern, error = %e, "invalid invalidation pattern");
            return 0;
        }
        if !self.ready("del_pattern", pattern) {
            return 0;
        }

        let mut removed = BTreeSet::new();
        for tier in self.tiers.tiers() {
            if !tier.is_available() {
                continue;
            }

            let keys = match self.matching_keys(tier, pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    self.absorb("del_pattern", pattern, &e);
                    continue;
                }
            };

            for batch in keys.chunks(self.scan_batch) {
                for key in batch {
                    match tier.delete(key).await {
                        Ok(true) => {
                            removed.insert(key.clone());
                        }
                        Ok(false) => {}
                        Err(e) => self.absorb("del_pattern", key, &e),
                    }
                }
                tokio::task::yield_now().await;
            }
        }

        let count = removed.len();
        Metrics::bump(&self.metrics.deletes, count as u64);
        info!(pattern, removed = count, "invalidated cache keys");
        count
    }

    /// Increment a counter, creating it at 1; the TTL applies only on creation
    pub async fn incr(&self, key: &str, options: &CacheOptions) -> Option<i64> {
        let key = options.key(key);
        if !self.ready("incr", &key) {
            return None;
        }

        match self.tiers.incr(&key, options.ttl).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.absorb("incr", &key, &e);
                None
            }
        }
    }

    /// Empty every tier and reset all counters
    pub async fn clear(&self) {
        if !self.ready("clear", "*") {
            return;
        }
        if let Err(e) = self.tiers.clear().await {
            self.absorb("clear", "*", &e);
        }
        self.metrics.reset();
        info!("cache cleared");
    }

    /// Sweep expired entries from every tier
    pub async fn cleanup(&self) -> usize {
        self.tiers.cleanup().await
    }

    /// Tier snapshots plus facade totals
    pub async fn stats(&self) -> CacheReport {
        let tiers = self.tiers.stats().await;
        CacheReport {
            l1: tiers.l1,
            l2: tiers.l2,
            overall: self.metrics.snapshot(),
        }
    }

    async fn matching_keys(
        &self,
        tier: &Arc<dyn CacheStore>,
        pattern: &str,
    ) -> shelfstore::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let page = tier.scan(cursor, pattern, self.scan_batch).await?;
            keys.extend(page.keys);
            if page.cursor == 0 {
                return Ok(keys);
            }
            cursor = page.cursor;
            tokio::task::yield_now().await;
        }
    }

    fn ready(&self, op: &str, key: &str) -> bool {
        if self.tiers.is_available() {
            true
        } else {
            warn!(op, key, "cache unavailable, skipping");
            false
        }
    }

    fn absorb(&self, op: &str, key: &str, error: &Error) {
        Metrics::bump(&self.metrics.errors, 1);
        warn!(op, key, error = %error, "cache operation failed, continuing without cache");
    }
}
