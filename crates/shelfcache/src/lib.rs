//! # shelfcache
//!
//! Two-level cache built on [`shelfstore`] tiers.
//!
//! ## Architecture
//! - **TieredCache**: L1 in front of L2 with read-through promotion
//! - **Cache**: typed, prefixed, never-failing facade for request handlers
//! - **Warmer**: keeps a fixed set of keys populated on a schedule
//! - **ScheduledTask**: cancellable periodic job used for cleanup and warming

#![warn(missing_docs)]

mod facade;
mod task;
mod tiered;
mod warmer;

pub use facade::{
    Cache, CacheOptions, CacheReport, OverallStats, DEFAULT_L1_TTL, DEFAULT_L2_TTL,
    DEFAULT_SCAN_BATCH,
};
pub use task::{spawn_cleanup, ScheduledTask, DEFAULT_CLEANUP_INTERVAL};
pub use tiered::{TierStats, TieredCache};
pub use warmer::{Fetcher, WarmEntry, WarmReport, Warmer, DEFAULT_WARM_INTERVAL};
