//! Durable, file-backed cache tier.
//!
//! Stores one JSON document per sanitized cache key under a single storage
//! root. The tier is strictly best-effort: construction failures disable it
//! (the cache degrades to memory-only), missing or corrupt files read as
//! `None`, and write failures are logged but never surfaced to callers. A
//! broken cache entry must never block a fresh fetch.

use std::path::PathBuf;

use directories::ProjectDirs;
use tokio::fs;
use tracing::{debug, warn};

use super::entry::CacheEntry;

/// File extension for persisted cache entries
const ENTRY_EXTENSION: &str = "json";

/// File-backed key/value store surviving process restarts.
#[derive(Debug, Clone)]
pub struct PersistenceService {
    /// Directory holding one file per cache key
    root: PathBuf,
    /// False when the storage root could not be created
    enabled: bool,
}

impl PersistenceService {
    /// Creates a persistence service rooted at the given directory.
    ///
    /// The directory is created recursively. On failure the service is
    /// constructed anyway but disabled, so the cache degrades to
    /// memory-only; this is logged once here and not treated as fatal.
    pub fn new(root: PathBuf) -> Self {
        let enabled = match std::fs::create_dir_all(&root) {
            Ok(()) => true,
            Err(e) => {
                warn!(root = %root.display(), error = %e,
                    "Could not create cache storage root; persistence disabled");
                false
            }
        };
        Self { root, enabled }
    }

    /// Returns the default XDG-compliant storage root, if one can be
    /// determined (e.g. `~/.cache/marketlens/` on Linux).
    pub fn default_root() -> Option<PathBuf> {
        let dirs = ProjectDirs::from("", "", "marketlens")?;
        Some(dirs.cache_dir().to_path_buf())
    }

    /// Whether the durable tier is operational.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Maps a cache key to an identifier safe for the filesystem.
    ///
    /// Every character outside `[A-Za-z0-9._-]` is replaced with `_`, so
    /// keys containing path separators or query syntax cannot escape the
    /// storage root. Sanitization applies only to the on-disk name; the
    /// in-memory tier keeps the original key.
    pub fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Returns the file path backing the given cache key.
    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", Self::sanitize_key(key), ENTRY_EXTENSION))
    }

    /// Persists an entry for the given key, replacing any previous file.
    ///
    /// Failures are logged and swallowed; the in-memory tier already holds
    /// the entry and the data is re-derivable from the provider.
    pub async fn save(&self, key: &str, entry: &CacheEntry) {
        if !self.enabled {
            return;
        }

        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Could not serialize cache entry");
                return;
            }
        };

        let path = self.entry_path(key);
        if let Err(e) = fs::write(&path, json).await {
            warn!(key, path = %path.display(), error = %e, "Could not persist cache entry");
        }
    }

    /// Loads the entry for the given key.
    ///
    /// Returns `None` for a missing file without logging; any other I/O or
    /// deserialization failure is logged and also reads as `None`.
    pub async fn load(&self, key: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Could not read cache entry");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key, path = %path.display(), error = %e,
                    "Corrupt cache entry on disk; treating as miss");
                None
            }
        }
    }

    /// Removes the entry for the given key, if present.
    pub async fn remove(&self, key: &str) {
        if !self.enabled {
            return;
        }

        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Could not remove cache entry")
            }
        }
    }

    /// Deletes every persisted entry under the storage root.
    pub async fn clear_all(&self) {
        if !self.enabled {
            return;
        }

        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Could not list cache directory");
                return;
            }
        };

        let mut removed = 0usize;
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not remove cache entry")
                }
            }
        }
        debug!(removed, "Cleared persisted cache entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (PersistenceService, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = PersistenceService::new(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[test]
    fn test_sanitize_key_replaces_unsafe_characters() {
        assert_eq!(
            PersistenceService::sanitize_key("fred:industry:GDP/Q?units=bn"),
            "fred_industry_GDP_Q_units_bn"
        );
        assert_eq!(
            PersistenceService::sanitize_key("bls:series:CES0000000001"),
            "bls_series_CES0000000001"
        );
    }

    #[test]
    fn test_sanitize_key_preserves_safe_characters() {
        assert_eq!(
            PersistenceService::sanitize_key("plain-key.v2_x"),
            "plain-key.v2_x"
        );
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (store, _temp_dir) = create_test_store();
        let entry = CacheEntry::new(Some(json!({"value": 42})), 60_000);

        store.save("roundtrip", &entry).await;
        let loaded = store.load("roundtrip").await.expect("Should load entry");

        assert_eq!(loaded, entry);
    }

    #[tokio::test]
    async fn test_save_and_load_with_unsafe_key() {
        let (store, temp_dir) = create_test_store();
        let entry = CacheEntry::new(Some(json!([1, 2, 3])), 60_000);

        store.save("census:industry:2021/cbp?for=us", &entry).await;

        // The file lands inside the root under the sanitized name
        let expected = temp_dir
            .path()
            .join("census_industry_2021_cbp_for_us.json");
        assert!(expected.exists(), "Sanitized file should exist");

        let loaded = store
            .load("census:industry:2021/cbp?for=us")
            .await
            .expect("Should load through the same sanitized identifier");
        assert_eq!(loaded, entry);
    }

    #[tokio::test]
    async fn test_load_missing_key_returns_none() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.load("never_written").await.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_returns_none() {
        let (store, temp_dir) = create_test_store();
        std::fs::write(temp_dir.path().join("broken.json"), "{not json")
            .expect("Should write corrupt file");

        assert!(store.load("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_negative_entry_round_trip() {
        let (store, _temp_dir) = create_test_store();
        let entry = CacheEntry::new(None, 3_600_000);

        store.save("negative", &entry).await;
        let loaded = store.load("negative").await.expect("Should load entry");

        assert!(loaded.data.is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (store, _temp_dir) = create_test_store();
        let entry = CacheEntry::new(Some(json!(1)), 60_000);

        store.save("gone", &entry).await;
        store.remove("gone").await;
        store.remove("gone").await;

        assert!(store.load("gone").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_all_removes_only_entries() {
        let (store, temp_dir) = create_test_store();
        store.save("a", &CacheEntry::new(Some(json!(1)), 60_000)).await;
        store.save("b", &CacheEntry::new(None, 60_000)).await;
        std::fs::write(temp_dir.path().join("unrelated.txt"), "keep")
            .expect("Should write unrelated file");

        store.clear_all().await;
        store.clear_all().await;

        assert!(store.load("a").await.is_none());
        assert!(store.load("b").await.is_none());
        assert!(temp_dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_disabled_store_degrades_silently() {
        // A root that cannot be created: a path below an existing file
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "file").expect("Should write blocker file");

        let store = PersistenceService::new(blocker.join("nested"));
        assert!(!store.is_enabled());

        store.save("k", &CacheEntry::new(Some(json!(1)), 60_000)).await;
        assert!(store.load("k").await.is_none());
        store.remove("k").await;
        store.clear_all().await;
    }

    #[test]
    fn test_new_creates_nested_root() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested = temp_dir.path().join("a").join("b").join("c");

        let store = PersistenceService::new(nested.clone());

        assert!(store.is_enabled());
        assert!(nested.exists(), "Nested storage root should be created");
    }
}
