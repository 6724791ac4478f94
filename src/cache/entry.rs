//! Core cache types: the stored entry, lookup results, and running statistics.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single cached record as stored in both tiers.
///
/// `data == None` is a valid cached state: it records a confirmed negative
/// outcome (no data, rate limited, unrecognized payload) so that repeated
/// identical requests do not re-hit the provider. This is distinct from the
/// key being absent, which a lookup reports as [`Lookup::Miss`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached value, or `None` for a cached negative result
    pub data: Option<Value>,
    /// When the entry was created, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Time-to-live in milliseconds
    pub ttl: u64,
}

impl CacheEntry {
    /// Creates an entry timestamped now.
    pub fn new(data: Option<Value>, ttl_ms: u64) -> Self {
        Self::with_timestamp(data, Utc::now().timestamp_millis(), ttl_ms)
    }

    /// Creates an entry with an explicit creation timestamp (epoch millis).
    pub fn with_timestamp(data: Option<Value>, timestamp: i64, ttl_ms: u64) -> Self {
        Self {
            data,
            timestamp,
            ttl: ttl_ms,
        }
    }

    /// Whether the entry is expired at the given instant (epoch millis).
    ///
    /// The boundary is inclusive: an entry is expired once
    /// `now - timestamp >= ttl`. TTLs beyond `i64::MAX` saturate rather
    /// than wrap, so an oversized configured TTL means "effectively
    /// never expires", not "always expired".
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        let ttl = i64::try_from(self.ttl).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp) >= ttl
    }

    /// Whether the entry is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    /// The creation timestamp as a UTC datetime.
    pub fn cached_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Result of a TTL-evaluating cache lookup.
///
/// `Miss` means the key was absent (or expired) in both tiers; `Hit(None)`
/// means an unexpired entry was found whose cached value is a negative
/// result. Callers must not conflate the two.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// No unexpired entry exists for the key
    Miss,
    /// An unexpired entry was found; `None` is a cached negative
    Hit(Option<Value>),
}

impl Lookup {
    /// Whether this lookup found an unexpired entry.
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Process-lifetime cache counters.
///
/// Counters reset only on process restart. `size` is the in-memory entry
/// count; the persistence tier is not sized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups served from either tier
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Current number of in-memory entries
    pub size: usize,
    /// When any entry was last written, if ever
    pub last_refreshed: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_not_expired_before_ttl() {
        let entry = CacheEntry::with_timestamp(Some(json!(1)), 1_000, 500);
        assert!(!entry.is_expired_at(1_000));
        assert!(!entry.is_expired_at(1_499));
    }

    #[test]
    fn test_entry_expired_at_exact_boundary() {
        let entry = CacheEntry::with_timestamp(Some(json!(1)), 1_000, 500);
        assert!(entry.is_expired_at(1_500));
        assert!(entry.is_expired_at(2_000));
    }

    #[test]
    fn test_oversized_ttl_saturates_instead_of_wrapping() {
        let entry = CacheEntry::with_timestamp(Some(json!(1)), 0, u64::MAX);
        assert!(!entry.is_expired_at(0));
        assert!(!entry.is_expired_at(i64::MAX - 1));
    }

    #[test]
    fn test_negative_entry_is_valid_and_serializable() {
        let entry = CacheEntry::new(None, 3_600_000);
        let json = serde_json::to_string(&entry).expect("Should serialize");
        let back: CacheEntry = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(back.data, None);
        assert_eq!(back.ttl, 3_600_000);
    }

    #[test]
    fn test_cached_at_round_trips_timestamp() {
        let entry = CacheEntry::with_timestamp(None, 1_700_000_000_000, 1_000);
        assert_eq!(entry.cached_at().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_lookup_hit_none_is_a_hit() {
        assert!(Lookup::Hit(None).is_hit());
        assert!(Lookup::Hit(Some(json!("x"))).is_hit());
        assert!(!Lookup::Miss.is_hit());
    }
}
