//! Store capability trait shared by every tier implementation

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::stats::StatsSnapshot;

/// One page of an incremental key scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Cursor for the next call; `0` once the iteration is complete
    pub cursor: u64,
    /// Matching keys found in this page
    pub keys: Vec<String>,
}

/// A key-value store with per-entry expiry.
///
/// Values are opaque bytes. `ttl = None` means "use the store's default
/// TTL". Implementations are selected at construction time: the in-process
/// [`MemoryStore`](crate::MemoryStore) or the RESP-backed
/// [`RemoteStore`](crate::RemoteStore).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short name used in logs and stats
    fn name(&self) -> &str;

    /// TTL applied when a write does not specify one
    fn default_ttl(&self) -> Duration;

    /// Whether the store can currently accept requests
    fn is_available(&self) -> bool {
        true
    }

    /// Look up a live value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check for a live key without touching hit/miss counters
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Drop every entry
    async fn clear(&self) -> Result<()>;

    /// Increment an integer counter, creating it at 1 with `ttl` if absent
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64>;

    /// Reset a live key's expiry to `ttl` from now; false if the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Enumerate live keys matching `pattern`, `count` slots at a time
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// All live keys matching `pattern`
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let page = self.scan(cursor, pattern, 256).await?;
            keys.extend(page.keys);
            if page.cursor == 0 {
                return Ok(keys);
            }
            cursor = page.cursor;
        }
    }

    /// Remove expired entries, returning how many were dropped
    async fn cleanup(&self) -> Result<usize> {
        Ok(0)
    }

    /// Counter snapshot
    async fn stats(&self) -> Result<StatsSnapshot>;
}
