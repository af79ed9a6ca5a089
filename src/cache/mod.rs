//! Response cache: named, versioned regions with per-region eviction.
//!
//! - Entries are keyed by method + URL and hold a full response snapshot
//! - Each region is bounded by entry count (oldest insertion evicted first)
//!   and by age (expired entries are treated as misses)
//! - Region names carry the cache version; stale generations are purged
//!   wholesale on activation

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheKey, Region};
#[cfg(test)]
pub use traits::CachedResponse;
