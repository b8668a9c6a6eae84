//! # shelfstore
//!
//! Key-value stores with per-entry expiry, used as the tiers of ShelfCache.
//!
//! ## Architecture
//! - **MemoryStore**: capacity-bounded in-process map, lazy expiry,
//!   hit-count eviction
//! - **RemoteStore**: the same capability set over RESP, for a tier living in
//!   another process
//! - **CacheStore**: the async trait both implement, selected at construction
//! - **Pattern**: glob key patterns for `KEYS`/`SCAN` style enumeration

#![warn(missing_docs)]

mod error;
mod glob;
mod memory;
mod remote;
mod stats;
mod traits;
pub mod wire;

pub use error::{Error, Result};
pub use glob::Pattern;
pub use memory::{MemoryStore, DEFAULT_CAPACITY, DEFAULT_TTL, MAX_TTL};
pub use remote::{RemoteConfig, RemoteStore};
pub use stats::{hit_rate, StatsSnapshot, StoreStats};
pub use traits::{CacheStore, ScanPage};
