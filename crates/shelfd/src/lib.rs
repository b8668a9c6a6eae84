//! # shelfd
//!
//! Daemon wiring for ShelfCache: builds the tiers from configuration, runs
//! the cleanup and warm tasks, serves the ops HTTP endpoints and optionally
//! exposes the L2 store over RESP so other daemons can share it.

pub mod config;
pub mod handler;
pub mod http;
pub mod server;
pub mod sources;

use std::sync::Arc;

use shelfcache::{Cache, TieredCache};
use shelfstore::{CacheStore, MemoryStore, RemoteConfig, RemoteStore};
use tracing::info;

use crate::config::Args;

/// Build the two tiers described by `args`.
///
/// L2 is a [`RemoteStore`] when `--l2-addr` is given, otherwise an
/// in-process store. The remote connection is opened lazily.
pub fn build_tiers(args: &Args) -> TieredCache {
    let l1: Arc<dyn CacheStore> = Arc::new(MemoryStore::new("l1", args.l1_capacity, args.l1_ttl()));

    let l2: Arc<dyn CacheStore> = match &args.l2_addr {
        Some(addr) => {
            info!(addr = %addr, "using remote L2 store");
            let mut config = RemoteConfig::new(addr.clone());
            config.default_ttl = args.l2_ttl();
            Arc::new(RemoteStore::new(config))
        }
        None => Arc::new(MemoryStore::new("l2", args.l2_capacity, args.l2_ttl())),
    };

    TieredCache::new(l1, l2)
}

/// Cache facade over [`build_tiers`]
pub fn build_cache(args: &Args) -> Arc<Cache> {
    Arc::new(Cache::new(build_tiers(args)))
}
