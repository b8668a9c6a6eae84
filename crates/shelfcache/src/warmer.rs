//! Cache warming: populate known-hot keys ahead of demand

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::facade::{Cache, CacheOptions};
use crate::task::ScheduledTask;

/// Default period between warm passes
pub const DEFAULT_WARM_INTERVAL: Duration = Duration::from_secs(600);

/// Async producer of a value to warm
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A key to keep warm and how to produce its value
#[derive(Clone)]
pub struct WarmEntry {
    key: String,
    fetcher: Fetcher,
    options: CacheOptions,
}

impl WarmEntry {
    /// Warm `key` with the value produced by `fetcher`
    pub fn new<F>(key: impl Into<String>, fetcher: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            options: CacheOptions::NONE,
        }
    }

    /// Replace the cache options
    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Store the warmed value with this TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.options.ttl = Some(ttl);
        self
    }

    /// Cache key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for WarmEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmEntry")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Outcome of one warm pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Keys fetched and stored
    pub warmed: usize,
    /// Keys already cached
    pub skipped: usize,
    /// Keys whose fetcher failed
    pub failed: usize,
}

/// Periodically fetches a fixed list of keys into the cache.
///
/// Keys already present are left alone. A failing fetcher is logged and the
/// pass moves on to the next key.
pub struct Warmer {
    cache: Arc<Cache>,
    entries: Arc<[WarmEntry]>,
    interval: Duration,
    task: Mutex<Option<ScheduledTask>>,
}

impl Warmer {
    /// Warmer for `entries`, run every `interval` once started
    pub fn new(cache: Arc<Cache>, entries: Vec<WarmEntry>, interval: Duration) -> Self {
        Self {
            cache,
            entries: entries.into(),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Keys this warmer maintains
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(WarmEntry::key)
    }

    /// Start periodic warming with an immediate first pass.
    ///
    /// Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("cache warmer already running");
            return false;
        }

        let cache = Arc::clone(&self.cache);
        let entries = Arc::clone(&self.entries);
        *task = Some(ScheduledTask::spawn("cache-warmer", self.interval, true, move || {
            let cache = Arc::clone(&cache);
            let entries = Arc::clone(&entries);
            async move {
                run_pass(&cache, &entries).await;
            }
        }));
        info!(
            keys = self.entries.len(),
            interval_secs = self.interval.as_secs(),
            "cache warmer started"
        );
        true
    }

    /// Stop periodic warming; a pass in progress completes first
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// True while the periodic task is active
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Run one pass now, independent of the schedule
    pub async fn warm_pass(&self) -> WarmReport {
        run_pass(&self.cache, &self.entries).await
    }

    /// Warm a single key now, returning the cached or freshly fetched value
    pub async fn warm_key<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        self.cache.get_or_set(key, fetcher, options).await
    }
}

async fn run_pass(cache: &Cache, entries: &[WarmEntry]) -> WarmReport {
    let mut report = WarmReport::default();
    for entry in entries {
        if cache.exists(&entry.key, &entry.options).await {
            report.skipped += 1;
            continue;
        }

        match (entry.fetcher)().await {
            Ok(value) => {
                cache.set(&entry.key, &value, &entry.options).await;
                debug!(key = %entry.key, "warmed cache key");
                report.warmed += 1;
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "failed to warm cache key");
                report.failed += 1;
            }
        }
    }
    info!(
        warmed = report.warmed,
        skipped = report.skipped,
        failed = report.failed,
        "cache warm pass complete"
    );
    report
}
