//! Tiered, TTL-governed cache.
//!
//! Two tiers: a fast in-memory map and a durable file-backed store that
//! survives process restarts. Entries carry an outcome-specific TTL and may
//! hold a confirmed negative result (`data == None`) so repeated requests
//! stay off the upstream provider until the shorter negative TTL lapses.

mod entry;
mod persistence;
mod service;

pub use entry::{CacheEntry, CacheStats, Lookup};
pub use persistence::PersistenceService;
pub use service::CacheService;
