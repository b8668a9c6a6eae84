//! Cancellable background tasks on a fixed period

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::facade::Cache;

/// Default period of the expired-entry sweep
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle to a periodic job running on the tokio runtime.
///
/// The job runs once per `period` until [`ScheduledTask::stop`] is called or
/// the handle is dropped. A run in progress is allowed to finish.
pub struct ScheduledTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn `job` every `period`; with `immediate` the first run starts now
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        immediate: bool,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(Duration::from_millis(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !immediate {
                // The first tick of an interval completes at once
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = %task_name, "scheduled task exited");
        });

        info!(task = %name, period_ms = period.as_millis() as u64, "scheduled task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Task name, for logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = %self.name, error = %e, "scheduled task ended abnormally");
        } else {
            info!(task = %self.name, "scheduled task stopped");
        }
    }
}

/// Sweep expired entries from every tier of `cache` each `period`
pub fn spawn_cleanup(cache: Arc<Cache>, period: Duration) -> ScheduledTask {
    ScheduledTask::spawn("cache-cleanup", period, false, move || {
        let cache = Arc::clone(&cache);
        async move {
            let removed = cache.cleanup().await;
            if removed > 0 {
                debug!(removed, "expired cache entries swept");
            }
        }
    })
}
