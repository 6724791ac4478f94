//! Two-tier cache orchestration.
//!
//! `CacheService` fronts an in-memory map with a file-backed persistence
//! tier. Reads check memory first, fall back to disk, and promote disk hits
//! back into memory. Expiry is evaluated lazily at read time only; an
//! expired entry found during a read is removed from both tiers. There is
//! no background sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheStats, Lookup};
use super::persistence::PersistenceService;

/// Locks a mutex, recovering the guard if a panicking thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates the in-memory and persistence cache tiers and tracks
/// hit/miss statistics.
///
/// Construct one instance at process start and share it (`Arc`) across all
/// data sources; the statistics are process-lifetime scoped.
#[derive(Debug)]
pub struct CacheService {
    /// Fast tier: full cache keys to entries
    memory: Mutex<HashMap<String, CacheEntry>>,
    /// Durable tier, absent when running memory-only
    persistence: Option<PersistenceService>,
    /// Queue feeding the single writer task; started on the first write
    writer: Mutex<Option<mpsc::UnboundedSender<(String, CacheEntry)>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    last_refreshed: Mutex<Option<DateTime<Utc>>>,
}

impl CacheService {
    /// Creates a cache backed by the given persistence tier, or memory-only
    /// when `persistence` is `None`.
    pub fn new(persistence: Option<PersistenceService>) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            persistence,
            writer: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_refreshed: Mutex::new(None),
        }
    }

    /// Creates a memory-only cache. Used by tests and by deployments where
    /// no writable storage root exists.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Looks up an unexpired value for the key.
    ///
    /// Returns [`Lookup::Miss`] when nothing usable exists in either tier.
    /// A disk hit is promoted into memory so the next read stays off the
    /// filesystem. An expired entry found along the way is removed from
    /// both tiers and counts as a miss.
    pub async fn get(&self, key: &str) -> Lookup {
        let now = Utc::now().timestamp_millis();

        {
            let mut memory = lock(&self.memory);
            match memory.get(key) {
                Some(entry) if !entry.is_expired_at(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Lookup::Hit(entry.data.clone());
                }
                Some(_) => {
                    // Lazy expiry: drop from memory, then fall through so the
                    // (equally stale) persisted copy is removed too.
                    memory.remove(key);
                }
                None => {}
            }
        }

        if let Some(ref persistence) = self.persistence {
            if let Some(entry) = persistence.load(key).await {
                if !entry.is_expired_at(now) {
                    lock(&self.memory).insert(key.to_string(), entry.clone());
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Promoted persisted cache entry into memory");
                    return Lookup::Hit(entry.data);
                }
                persistence.remove(key).await;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Lookup::Miss
    }

    /// Returns the full entry for the key without evaluating its TTL.
    ///
    /// Freshness queries use this to read the original timestamp of stale
    /// data. The lookup does not promote, evict, or touch the counters.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = lock(&self.memory).get(key) {
            return Some(entry.clone());
        }
        match self.persistence {
            Some(ref persistence) => persistence.load(key).await,
            None => None,
        }
    }

    /// Stores a value (or a negative result, `data == None`) under the key.
    ///
    /// The in-memory write completes before this returns; the durable write
    /// is queued to a single writer task and not awaited, so writes reach
    /// disk in the order the memory tier saw them and the newest value for
    /// a key always lands last. A crash before the queue drains loses only
    /// re-derivable data.
    pub async fn set(&self, key: &str, data: Option<Value>, ttl_ms: u64) {
        let entry = CacheEntry::new(data, ttl_ms);
        {
            let mut memory = lock(&self.memory);
            memory.insert(key.to_string(), entry.clone());
            if let Some(ref persistence) = self.persistence {
                // Enqueued under the map lock: queue order matches the
                // order of the memory writes.
                let mut writer = lock(&self.writer);
                let sender =
                    writer.get_or_insert_with(|| Self::spawn_writer(persistence.clone()));
                if sender.send((key.to_string(), entry)).is_err() {
                    warn!(key, "Cache writer task is gone; entry not persisted");
                }
            }
        }
        *lock(&self.last_refreshed) = Some(Utc::now());
    }

    /// Starts the task draining queued durable writes, one at a time, in
    /// queue order.
    fn spawn_writer(
        persistence: PersistenceService,
    ) -> mpsc::UnboundedSender<(String, CacheEntry)> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(String, CacheEntry)>();
        tokio::spawn(async move {
            while let Some((key, entry)) = receiver.recv().await {
                persistence.save(&key, &entry).await;
            }
        });
        sender
    }

    /// Removes the key from both tiers.
    pub async fn clear(&self, key: &str) {
        lock(&self.memory).remove(key);
        if let Some(ref persistence) = self.persistence {
            persistence.remove(key).await;
        }
    }

    /// Wipes the in-memory map and deletes every persisted entry.
    pub async fn clear_all(&self) {
        lock(&self.memory).clear();
        if let Some(ref persistence) = self.persistence {
            persistence.clear_all().await;
        }
    }

    /// Returns the running counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: lock(&self.memory).len(),
            last_refreshed: *lock(&self.last_refreshed),
        }
    }

    /// Inserts a pre-built entry directly into memory. Test hook for
    /// exercising expiry with back-dated timestamps.
    #[cfg(test)]
    pub(crate) fn insert_entry(&self, key: &str, entry: CacheEntry) {
        lock(&self.memory).insert(key.to_string(), entry);
    }
}
