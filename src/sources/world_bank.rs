//! World Bank indicators source.
//!
//! Keyless GET API. The response envelope is a two-element JSON array:
//! paging metadata first, then the observation rows (or `null` when the
//! indicator has nothing for the selection). Request problems come back as
//! a one-element array whose member carries a `message` list with numeric
//! string ids.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheService, CacheStats};
use crate::config::ProviderConfig;
use crate::error::SourceError;

use super::{
    market_size_outcome, DataSource, IndustrySeries, MarketSize, Outcome, SeriesPoint, SourceCore,
    SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "world_bank";

const WORLD_BANK_BASE_URL: &str = "https://api.worldbank.org/v2";

/// Message id the World Bank uses for request-rate rejections
const RATE_LIMIT_MESSAGE_ID: &str = "175";

#[derive(Debug, Deserialize)]
struct WorldBankRow {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    value: Option<f64>,
}

/// Data source for World Bank indicator series. No credential required.
/// The query resource is the indicator code (e.g. `NY.GDP.MKTP.CD`); the
/// country selection defaults to `all` and is overridable via the
/// `country` parameter.
pub struct WorldBankSource {
    http: Client,
    core: SourceCore,
    base_url: String,
}

impl WorldBankSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        info!(provider = PROVIDER, "World Bank source configured (no credential required)");
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            base_url: WORLD_BANK_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_series(
        &self,
        query: &SourceQuery,
    ) -> Result<Outcome<IndustrySeries>, SourceError> {
        let country = query.param("country").unwrap_or("all");
        let mut url = format!(
            "{}/country/{}/indicator/{}?format=json&per_page=500",
            self.base_url, country, query.resource
        );
        for (name, value) in &query.params {
            if name == "country" {
                continue;
            }
            url.push_str(&format!("&{name}={value}"));
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::transport(PROVIDER, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::transport(PROVIDER, e))?;

        classify(status, &body, &query.resource)
    }
}

fn classify(status: u16, body: &str, resource: &str) -> Result<Outcome<IndustrySeries>, SourceError> {
    let root: Value = match serde_json::from_str(body) {
        Ok(root) => root,
        Err(_) => {
            if !(200..300).contains(&status) {
                return Err(SourceError::Status {
                    provider: PROVIDER,
                    status,
                });
            }
            return Ok(Outcome::Malformed("response body is not JSON".to_string()));
        }
    };

    let Some(elements) = root.as_array() else {
        return Ok(Outcome::Malformed("expected a JSON array envelope".to_string()));
    };

    // Request-problem envelope: [{ "message": [{"id": "...", ...}] }].
    // The Bank sends these with HTTP 200, so check before the status.
    if let Some(messages) = elements
        .first()
        .and_then(|e| e.get("message"))
        .and_then(Value::as_array)
    {
        let rate_limited = messages
            .iter()
            .any(|m| m.get("id").and_then(Value::as_str) == Some(RATE_LIMIT_MESSAGE_ID));
        if rate_limited {
            return Ok(Outcome::RateLimited);
        }
        // Invalid indicator/country: a confirmed "nothing for this request"
        return Ok(Outcome::NoData);
    }

    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            provider: PROVIDER,
            status,
        });
    }

    let rows = match elements.get(1) {
        None | Some(Value::Null) => return Ok(Outcome::NoData),
        Some(rows) => rows,
    };
    let rows: Vec<WorldBankRow> = match serde_json::from_value(rows.clone()) {
        Ok(rows) => rows,
        Err(e) => return Ok(Outcome::Malformed(format!("unexpected row shape: {e}"))),
    };
    if rows.is_empty() {
        return Ok(Outcome::NoData);
    }

    // Rows arrive newest first
    let points: Vec<SeriesPoint> = rows
        .into_iter()
        .rev()
        .map(|row| SeriesPoint {
            period: row.date.unwrap_or_default(),
            value: row.value,
        })
        .collect();
    if points.iter().all(|p| p.value.is_none()) {
        return Ok(Outcome::NoData);
    }

    Ok(Outcome::Data(IndustrySeries {
        provider: PROVIDER.to_string(),
        resource: resource.to_string(),
        points,
        fetched_at: Utc::now(),
    }))
}

#[async_trait]
impl DataSource for WorldBankSource {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_industry_data(
        &self,
        query: &SourceQuery,
    ) -> Result<Option<IndustrySeries>, SourceError> {
        let key = query.cache_key(PROVIDER, OP_INDUSTRY);
        if let Some(cached) = self.core.lookup::<IndustrySeries>(&key).await {
            return Ok(cached);
        }
        let outcome = self.fetch_series(query).await?;
        Ok(self.core.store(&key, outcome).await)
    }

    async fn fetch_market_size(
        &self,
        query: &SourceQuery,
    ) -> Result<Option<MarketSize>, SourceError> {
        let key = query.cache_key(PROVIDER, OP_MARKET_SIZE);
        if let Some(cached) = self.core.lookup::<MarketSize>(&key).await {
            return Ok(cached);
        }
        let outcome = self.fetch_series(query).await?;
        let outcome = market_size_outcome(PROVIDER, outcome, query.measure.as_deref());
        Ok(self.core.store(&key, outcome).await)
    }

    async fn data_freshness(&self, query: &SourceQuery) -> Option<DateTime<Utc>> {
        self.core.freshness(query).await
    }

    fn cache_status(&self) -> CacheStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success_with_nulls_reversed() {
        let body = r#"[
            {"page": 1, "pages": 1, "per_page": 500, "total": 3},
            [
                {"indicator": {"id": "NY.GDP.MKTP.CD"}, "date": "2022", "value": 25462700000000.0},
                {"indicator": {"id": "NY.GDP.MKTP.CD"}, "date": "2021", "value": 23315080560000.0},
                {"indicator": {"id": "NY.GDP.MKTP.CD"}, "date": "2020", "value": null}
            ]
        ]"#;

        let Outcome::Data(series) = classify(200, body, "NY.GDP.MKTP.CD").expect("ok") else {
            panic!("Expected data");
        };
        assert_eq!(series.points.len(), 3);
        assert_eq!(series.points[0].period, "2020");
        assert_eq!(series.points[0].value, None);
        assert_eq!(series.points[2].period, "2022");
    }

    #[test]
    fn test_classify_null_rows_is_no_data() {
        let body = r#"[{"page": 1, "total": 0}, null]"#;
        assert_eq!(classify(200, body, "X").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_all_null_values_is_no_data() {
        let body = r#"[{"total": 1}, [{"date": "2020", "value": null}]]"#;
        assert_eq!(classify(200, body, "X").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_invalid_indicator_message_is_no_data() {
        let body = r#"[{"message": [{"id": "120", "key": "Invalid value", "value": "The provided parameter value is not valid"}]}]"#;
        assert_eq!(classify(200, body, "BOGUS").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_rate_limit_message_id() {
        let body = r#"[{"message": [{"id": "175", "key": "Request rate", "value": "Too many requests"}]}]"#;
        assert_eq!(classify(200, body, "X").expect("ok"), Outcome::RateLimited);
    }

    #[test]
    fn test_classify_error_status_without_envelope_raises() {
        let err = classify(502, "bad gateway", "X").unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_always_available() {
        let source = WorldBankSource::new(
            Arc::new(CacheService::in_memory()),
            ProviderConfig::default(),
        );
        assert!(source.is_available());
    }

    #[tokio::test]
    async fn test_cached_hit_skips_network() {
        let cache = Arc::new(CacheService::in_memory());
        let source = WorldBankSource::new(cache.clone(), ProviderConfig::default())
            .with_base_url("http://127.0.0.1:0");

        let query = SourceQuery::new("NY.GDP.MKTP.CD").with_param("country", "us");
        cache
            .set(&query.cache_key(PROVIDER, OP_MARKET_SIZE), None, 60_000)
            .await;

        let fetched = source
            .fetch_market_size(&query)
            .await
            .expect("Should serve cached negative");
        assert_eq!(fetched, None);
    }
}
