//! Bounded in-process store with per-entry TTL
//!
//! Entries live in an insertion-ordered map. Expiry is lazy: an entry whose
//! deadline has passed is treated as absent by every read and reclaimed on
//! access, on eviction, or by an explicit [`MemoryStore::cleanup`] sweep.
//!
//! When the store is full and a new key arrives, exactly one entry is
//! evicted: the first expired entry found, otherwise the entry with the
//! lowest hit count (oldest insertion wins ties). The scan is O(capacity).
//!
//! Every inserted key takes the next value of a per-store sequence. Map order
//! and sequence order agree, so a `scan` cursor is the sequence of the last
//! entry examined and stays valid when earlier entries are removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::RandomState;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{Error, Result};
use crate::glob::Pattern;
use crate::stats::{StatsSnapshot, StoreStats};
use crate::traits::{CacheStore, ScanPage};

/// Default number of entries a store holds
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Longest lifetime an entry can be given; longer TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    hit_count: u64,
    seq: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

type EntryMap = IndexMap<String, Entry, RandomState>;

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

/// Capacity-bounded TTL store
pub struct MemoryStore {
    name: String,
    entries: Mutex<EntryMap>,
    next_seq: AtomicU64,
    stats: StoreStats,
    capacity: usize,
    default_ttl: Duration,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` entries
    pub fn new(name: impl Into<String>, capacity: usize, default_ttl: Duration) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");

        Self {
            name: name.into(),
            entries: Mutex::new(IndexMap::with_capacity_and_hasher(
                capacity,
                RandomState::new(),
            )),
            next_seq: AtomicU64::new(1),
            stats: StoreStats::new(),
            capacity,
            default_ttl,
        }
    }

    /// Get a live value, bumping its hit count
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.shift_remove(key);
        }
        self.stats.record_miss();
        None
    }

    /// Insert or overwrite a value; the hit count restarts at zero.
    ///
    /// An overwrite keeps the key's position in scan order.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = deadline(now, ttl.unwrap_or(self.default_ttl));
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.value = value;
            entry.expires_at = expires_at;
            entry.hit_count = 0;
        } else {
            self.make_room(&mut entries, now);
            self.insert(&mut entries, key, value, expires_at);
        }

        self.stats.record_set();
    }

    /// Remove a key; expired entries are reclaimed but report `false`
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.lock().shift_remove(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.record_delete();
                true
            }
            _ => false,
        }
    }

    /// Check for a live key without counting a hit or miss
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };

        if expired {
            entries.shift_remove(key);
        }
        !expired
    }

    /// All live keys matching `pattern`
    pub fn keys(&self, pattern: &Pattern) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Examine up to `count` entries inserted after `cursor`.
    ///
    /// The returned cursor is 0 once nothing is left to examine. Keys present
    /// for the whole iteration are returned exactly once, even if other keys
    /// are removed between calls.
    pub fn scan(&self, cursor: u64, pattern: &Pattern, count: usize) -> ScanPage {
        let now = Instant::now();
        let entries = self.entries.lock();

        let start = first_after(&entries, cursor);
        let end = start.saturating_add(count.max(1)).min(entries.len());

        let mut keys = Vec::new();
        let mut last = cursor;
        for (key, entry) in entries.iter().skip(start).take(end.saturating_sub(start)) {
            last = entry.seq;
            if !entry.is_expired(now) && pattern.matches(key) {
                keys.push(key.clone());
            }
        }

        let cursor = if end >= entries.len() { 0 } else { last };
        ScanPage { cursor, keys }
    }

    /// Increment a decimal counter.
    ///
    /// A missing or expired key is created at 1 with `ttl`; an existing key
    /// keeps its expiry.
    pub fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired(now) {
                let next = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| Error::NotAnInteger(key.to_string()))?;
                entry.value = next.to_string().into_bytes();
                self.stats.record_set();
                return Ok(next);
            }
            entries.shift_remove(key);
        }

        self.make_room(&mut entries, now);
        let expires_at = deadline(now, ttl.unwrap_or(self.default_ttl));
        self.insert(&mut entries, key, b"1".to_vec(), expires_at);
        self.stats.record_set();
        Ok(1)
    }

    /// Change the expiry of a live key
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.lock().get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = deadline(now, ttl);
                true
            }
            _ => false,
        }
    }

    /// Remove every expired entry
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            trace!(store = %self.name, removed, "swept expired entries");
        }
        removed
    }

    /// Drop all entries and reset statistics
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.stats.reset();
    }

    /// Number of resident entries (expired ones included until reclaimed)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live counters
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    fn insert(&self, entries: &mut EntryMap, key: &str, value: Vec<u8>, expires_at: Instant) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                hit_count: 0,
                seq,
            },
        );
    }

    fn make_room(&self, entries: &mut EntryMap, now: Instant) {
        if entries.len() < self.capacity {
            return;
        }

        let mut victim: Option<(usize, u64)> = None;
        for (idx, (_, entry)) in entries.iter().enumerate() {
            if entry.is_expired(now) {
                victim = Some((idx, 0));
                break;
            }
            match victim {
                Some((_, fewest)) if entry.hit_count >= fewest => {}
                _ => victim = Some((idx, entry.hit_count)),
            }
        }

        if let Some((idx, _)) = victim {
            if let Some((key, _)) = entries.shift_remove_index(idx) {
                trace!(store = %self.name, key = %key, "evicted entry");
                self.stats.record_eviction();
            }
        }
    }
}

/// Index of the first entry whose sequence is past `cursor`
fn first_after(entries: &EntryMap, cursor: u64) -> usize {
    let (mut lo, mut hi) = (0, entries.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match entries.get_index(mid) {
            Some((_, entry)) if entry.seq <= cursor => lo = mid + 1,
            _ => hi = mid,
        }
    }
    lo
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(MemoryStore::get(self, key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        MemoryStore::set(self, key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(MemoryStore::delete(self, key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(MemoryStore::exists(self, key))
    }

    async fn clear(&self) -> Result<()> {
        MemoryStore::clear(self);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        MemoryStore::incr(self, key, ttl)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(MemoryStore::expire(self, key, ttl))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let pattern = Pattern::parse(pattern)?;
        Ok(MemoryStore::scan(self, cursor, &pattern, count))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = Pattern::parse(pattern)?;
        Ok(MemoryStore::keys(self, &pattern))
    }

    async fn cleanup(&self) -> Result<usize> {
        Ok(MemoryStore::cleanup(self))
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.stats.snapshot(self.len()))
    }
}
