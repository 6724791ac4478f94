//! Data-source adapters and their shared contract.
//!
//! Each submodule wraps one external statistics provider behind the common
//! [`DataSource`] trait: it builds the provider's request shape, parses that
//! provider's payload into the normalized types defined here, classifies the
//! outcome, and delegates storage to the shared cache with an
//! outcome-specific TTL. Callers never branch on provider identity.

pub mod alpha_vantage;
pub mod bls;
pub mod census;
pub mod eia;
pub mod fred;
pub mod imf;
pub mod nasdaq;
pub mod world_bank;

pub use alpha_vantage::AlphaVantageSource;
pub use bls::BlsSource;
pub use census::CensusSource;
pub use eia::EiaSource;
pub use fred::FredSource;
pub use imf::ImfSource;
pub use nasdaq::NasdaqSource;
pub use world_bank::WorldBankSource;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheService, CacheStats, Lookup};
use crate::config::TtlTiers;
use crate::error::SourceError;

/// Cache-key operation segment for industry time-series fetches
pub(crate) const OP_INDUSTRY: &str = "industry";

/// Cache-key operation segment for market-size fetches
pub(crate) const OP_MARKET_SIZE: &str = "market_size";

/// A logical fetch request, independent of provider wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    /// Provider-side resource identifier (series ID, dataset code,
    /// indicator,SDMX key path)
    pub resource: String,
    /// The measure the caller is after (e.g. "revenue", "employment");
    /// used by market-size value-field resolution when present
    pub measure: Option<String>,
    /// Additional query parameters, provider-specific
    pub params: Vec<(String, String)>,
}

impl SourceQuery {
    /// Creates a query for a resource with no extra parameters.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            measure: None,
            params: Vec::new(),
        }
    }

    /// Sets the measure of interest.
    pub fn with_measure(mut self, measure: impl Into<String>) -> Self {
        self.measure = Some(measure.into());
        self
    }

    /// Appends a query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Returns the value of a parameter, if set.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Builds the deterministic cache key for this query.
    ///
    /// Parameters are sorted by name so that identical logical requests
    /// always map to the same key regardless of construction order.
    pub fn cache_key(&self, provider: &str, op: &str) -> String {
        let mut params = self.params.clone();
        params.sort();
        if params.is_empty() {
            return format!("{provider}:{op}:{}", self.resource);
        }
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{provider}:{op}:{}?{}", self.resource, query.join("&"))
    }
}

/// One observation in a normalized time series.
///
/// `value == None` records an in-payload "no value" sentinel (FRED's `"."`,
/// BLS's `"-"`, World Bank's JSON `null`) without dropping the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Period label as reported by the provider (e.g. "2023", "2023-M08")
    pub period: String,
    /// Observation value, if the provider reported one
    pub value: Option<f64>,
}

/// A provider's data for one resource, normalized to a flat series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustrySeries {
    /// Provider name
    pub provider: String,
    /// Resource identifier the series was fetched for
    pub resource: String,
    /// Observations in chronological order
    pub points: Vec<SeriesPoint>,
    /// When the upstream call happened
    pub fetched_at: DateTime<Utc>,
}

/// A normalized record with named, positionally ordered fields.
///
/// Field order matters: the value-field fallback resolution picks "the
/// first non-date field by position" as its last resort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRecord {
    /// Field name/value pairs in provider column order
    pub fields: Vec<(String, Value)>,
}

impl DataRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Returns a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

/// A single market-size figure resolved out of a provider's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSize {
    /// Provider name
    pub provider: String,
    /// The resolved numeric value
    pub value: f64,
    /// Which record field supplied the value
    pub field: String,
    /// Period the value belongs to, when the record carried one
    pub period: Option<String>,
    /// When the upstream call happened
    pub fetched_at: DateTime<Utc>,
}

/// Classification of a raw provider response (step 4 of every fetch path).
///
/// `RateLimited`, `NoData` and `Malformed` are normal business outcomes
/// that cache as negatives; transport failures and missing credentials are
/// raised as [`SourceError`] instead and never reach this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Usable data was parsed out of the payload
    Data(T),
    /// The provider confirmed there is nothing for this request
    NoData,
    /// The provider reported its own rate limit inside the payload
    RateLimited,
    /// The payload matched no recognized shape; may indicate an upstream
    /// contract change
    Malformed(String),
}

impl<T> Outcome<T> {
    /// Maps the data variant, passing the other classes through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        self.and_then(|value| Outcome::Data(f(value)))
    }

    /// Chains a reclassification of the data variant, passing the other
    /// classes through.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Data(value) => f(value),
            Outcome::NoData => Outcome::NoData,
            Outcome::RateLimited => Outcome::RateLimited,
            Outcome::Malformed(reason) => Outcome::Malformed(reason),
        }
    }
}

/// Field-name fragments marking identifier-like columns
const IDENTIFIER_HINTS: &[&str] = &["id", "code", "series", "naics", "fips", "geo", "state"];

/// Field-name fragments marking date-like columns
const DATE_HINTS: &[&str] = &["date", "year", "period", "time", "quarter", "month"];

fn is_date_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    DATE_HINTS.iter().any(|hint| name.contains(hint))
}

fn is_identifier_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    IDENTIFIER_HINTS.iter().any(|hint| name.contains(hint))
}

/// Extracts a numeric reading from a record value. Providers disagree on
/// whether numbers arrive as JSON numbers or as strings; both are accepted.
/// Sentinel strings that do not parse ("." and "-") read as `None`.
pub(crate) fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolves which record field represents "the value".
///
/// Providers do not agree on column naming, so resolution falls back in
/// three steps: a field whose name matches the requested measure, then the
/// first numeric field that is neither an identifier nor a date, then the
/// first non-date field by position. Failing closed would make the
/// resolution useless for most real datasets.
pub fn resolve_value_field(records: &[DataRecord], measure: Option<&str>) -> Option<String> {
    let first = records.first()?;

    if let Some(measure) = measure {
        let needle = measure.to_ascii_lowercase();
        if let Some((name, _)) = first
            .fields
            .iter()
            .find(|(name, _)| name.to_ascii_lowercase().contains(&needle))
        {
            return Some(name.clone());
        }
    }

    if let Some((name, _)) = first.fields.iter().find(|(name, value)| {
        numeric_value(value).is_some() && !is_identifier_field(name) && !is_date_field(name)
    }) {
        return Some(name.clone());
    }

    first
        .fields
        .iter()
        .find(|(name, _)| !is_date_field(name))
        .map(|(name, _)| name.clone())
}

/// Resolves a market-size figure from normalized records.
///
/// Records are expected in chronological order; the most recent record with
/// a parseable value in the resolved field wins. The period is taken from
/// the first date-like field of that record.
pub fn market_size_from_records(
    provider: &str,
    records: &[DataRecord],
    measure: Option<&str>,
) -> Option<MarketSize> {
    let field = resolve_value_field(records, measure)?;

    for record in records.iter().rev() {
        let Some(value) = record.get(&field).and_then(numeric_value) else {
            continue;
        };
        let period = record
            .fields
            .iter()
            .find(|(name, _)| is_date_field(name))
            .and_then(|(_, v)| value_text(v));
        return Some(MarketSize {
            provider: provider.to_string(),
            value,
            field,
            period,
            fetched_at: Utc::now(),
        });
    }
    None
}

/// Flattens a normalized series into period/value records, so market-size
/// resolution works the same for time-series providers as for tabular ones.
pub(crate) fn series_records(series: &IndustrySeries) -> Vec<DataRecord> {
    series
        .points
        .iter()
        .map(|point| {
            let mut record = DataRecord::new();
            record.push("period", Value::String(point.period.clone()));
            match point.value {
                Some(v) => record.push(
                    "value",
                    serde_json::Number::from_f64(v)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                ),
                None => record.push("value", Value::Null),
            }
            record
        })
        .collect()
}

/// Normalizes tabular records into a series for providers that report
/// columns rather than observations (Census, Nasdaq Data Link). The period
/// is the first date-like field, falling back to the row position; the
/// value field is resolved with the usual fallback chain.
pub(crate) fn series_from_records(
    provider: &str,
    resource: &str,
    records: &[DataRecord],
    measure: Option<&str>,
) -> Outcome<IndustrySeries> {
    let Some(field) = resolve_value_field(records, measure) else {
        return Outcome::NoData;
    };

    let points: Vec<SeriesPoint> = records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let period = record
                .fields
                .iter()
                .find(|(name, _)| is_date_field(name))
                .and_then(|(_, value)| value_text(value))
                .unwrap_or_else(|| row.to_string());
            SeriesPoint {
                period,
                value: record.get(&field).and_then(numeric_value),
            }
        })
        .collect();

    if points.iter().all(|point| point.value.is_none()) {
        return Outcome::NoData;
    }
    Outcome::Data(IndustrySeries {
        provider: provider.to_string(),
        resource: resource.to_string(),
        points,
        fetched_at: Utc::now(),
    })
}

/// Converts a classified series outcome into a market-size outcome.
pub(crate) fn market_size_outcome(
    provider: &str,
    outcome: Outcome<IndustrySeries>,
    measure: Option<&str>,
) -> Outcome<MarketSize> {
    outcome.and_then(|series| {
        match market_size_from_records(provider, &series_records(&series), measure) {
            Some(size) => Outcome::Data(size),
            None => Outcome::NoData,
        }
    })
}

/// Shared cache plumbing for adapters: typed lookups and tier-selecting
/// stores against the process-wide [`CacheService`].
#[derive(Debug, Clone)]
pub(crate) struct SourceCore {
    provider: &'static str,
    cache: Arc<CacheService>,
    ttl: TtlTiers,
}

impl SourceCore {
    pub(crate) fn new(provider: &'static str, cache: Arc<CacheService>, ttl: TtlTiers) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    /// Typed cache lookup. Outer `None` is a total miss; `Some(None)` is a
    /// cached negative that must be returned to the caller without an
    /// upstream call.
    pub(crate) async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<Option<T>> {
        match self.cache.get(key).await {
            Lookup::Miss => None,
            Lookup::Hit(None) => {
                debug!(provider = self.provider, key, "Serving cached negative result");
                Some(None)
            }
            Lookup::Hit(Some(value)) => match serde_json::from_value(value) {
                Ok(data) => {
                    debug!(provider = self.provider, key, "Serving cached data");
                    Some(Some(data))
                }
                Err(e) => {
                    // Shape drift between releases; refetch instead of failing
                    warn!(provider = self.provider, key, error = %e,
                        "Cached value no longer deserializes; treating as miss");
                    None
                }
            },
        }
    }

    /// Caches a classified outcome under its TTL tier and returns the value
    /// the adapter should hand to the caller.
    pub(crate) async fn store<T: Serialize>(&self, key: &str, outcome: Outcome<T>) -> Option<T> {
        match outcome {
            Outcome::Data(data) => {
                match serde_json::to_value(&data) {
                    Ok(json) => self.cache.set(key, Some(json), self.ttl.success_ms).await,
                    Err(e) => {
                        warn!(provider = self.provider, key, error = %e,
                            "Could not serialize fetch result for caching");
                    }
                }
                Some(data)
            }
            Outcome::NoData => {
                debug!(provider = self.provider, key, "Provider returned no data");
                self.cache.set(key, None, self.ttl.no_data_ms).await;
                None
            }
            Outcome::RateLimited => {
                warn!(provider = self.provider, key, backoff_ms = self.ttl.rate_limit_ms,
                    "Provider rate limit reached; caching negative and backing off");
                self.cache.set(key, None, self.ttl.rate_limit_ms).await;
                None
            }
            Outcome::Malformed(reason) => {
                warn!(provider = self.provider, key, reason,
                    "Unrecognized payload shape; may indicate an upstream contract change");
                self.cache.set(key, None, self.ttl.no_data_ms).await;
                None
            }
        }
    }

    /// Timestamp of the newest cache entry for the query, expired or not,
    /// across both fetch operations.
    pub(crate) async fn freshness(&self, query: &SourceQuery) -> Option<DateTime<Utc>> {
        let mut latest = None;
        for op in [OP_INDUSTRY, OP_MARKET_SIZE] {
            let cached = self
                .cache
                .entry(&query.cache_key(self.provider, op))
                .await
                .map(|entry| entry.cached_at());
            if cached > latest {
                latest = cached;
            }
        }
        latest
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// The uniform fetch contract every provider adapter implements.
///
/// Dispatch is static over a known set of adapters; the trait exists so the
/// calling layers hold `&dyn DataSource` and never branch on provider
/// identity.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable provider name ("fred", "world_bank", ...).
    fn provider(&self) -> &'static str;

    /// Whether the adapter can serve real data (credential present, or the
    /// provider requires none). Decided and logged once at construction.
    fn is_available(&self) -> bool;

    /// Fetches the normalized time series for a resource.
    ///
    /// `Ok(None)` is a confirmed negative (no data, rate limited, or
    /// unrecognized payload), served from cache on repeat calls until its
    /// TTL lapses.
    async fn fetch_industry_data(
        &self,
        query: &SourceQuery,
    ) -> Result<Option<IndustrySeries>, SourceError>;

    /// Fetches a single market-size figure for a resource, resolving which
    /// field carries the value when the query does not name a measure.
    async fn fetch_market_size(
        &self,
        query: &SourceQuery,
    ) -> Result<Option<MarketSize>, SourceError>;

    /// When the cached data for this query was last fetched, ignoring TTL
    /// and covering both fetch operations. `None` means the query has
    /// never been fetched, as opposed to "fetched and stale".
    async fn data_freshness(&self, query: &SourceQuery) -> Option<DateTime<Utc>>;

    /// Running counters of the shared cache.
    fn cache_status(&self) -> CacheStats;
}
