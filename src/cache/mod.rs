//! Versioned response caches for offline support.
//!
//! This module provides:
//! - Three partitions (static assets, API responses, images) per cache version
//! - Entries keyed by request identity with an injected `cached_at` timestamp
//! - Per-partition TTLs that flag stale entries without evicting them
//! - Deletion of caches left behind by older versions

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, Cached, PartitionCounts};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{cache_key, CacheEntry, CacheResult, CacheSource, Partition, CACHED_AT_HEADER};

pub(crate) use storage::parse_datetime;
