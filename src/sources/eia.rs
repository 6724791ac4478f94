//! U.S. Energy Information Administration source.
//!
//! Uses the v2 `seriesid` compatibility route, which answers
//! `{"response": {"total", "data": [{"period", "value", ...}]}}`. EIA
//! reports its own failures as an in-payload `error` string with HTTP 200
//! or 403; only the messages mentioning the request rate classify as a
//! rate limit. An API key is required.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CacheService, CacheStats};
use crate::config::ProviderConfig;
use crate::error::SourceError;

use super::{
    market_size_outcome, numeric_value, DataSource, IndustrySeries, MarketSize, Outcome,
    SeriesPoint, SourceCore, SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "eia";

const EIA_BASE_URL: &str = "https://api.eia.gov/v2/seriesid";

#[derive(Debug, Deserialize)]
struct EiaEnvelope {
    #[serde(default)]
    response: Option<EiaResponse>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EiaResponse {
    #[serde(default)]
    data: Vec<EiaRow>,
}

#[derive(Debug, Deserialize)]
struct EiaRow {
    #[serde(default)]
    period: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
}

/// Data source for EIA energy series. Requires `EIA_API_KEY`. The query
/// resource is the series id, e.g. `PET.EMM_EPM0_PTE_NUS_DPG.W`.
pub struct EiaSource {
    http: Client,
    core: SourceCore,
    api_key: Option<String>,
    base_url: String,
}

impl EiaSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        if config.api_key.is_some() {
            info!(provider = PROVIDER, "EIA source configured");
        } else {
            warn!(provider = PROVIDER, "EIA_API_KEY not set; source unavailable");
        }
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            api_key: config.api_key,
            base_url: EIA_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn require_key(&self) -> Result<&str, SourceError> {
        self.api_key
            .as_deref()
            .ok_or(SourceError::MissingCredential {
                provider: PROVIDER,
                var: "EIA_API_KEY",
            })
    }

    async fn fetch_series(
        &self,
        query: &SourceQuery,
    ) -> Result<Outcome<IndustrySeries>, SourceError> {
        let api_key = self.require_key()?;
        let mut url = format!("{}/{}?api_key={}", self.base_url, query.resource, api_key);
        for (name, value) in &query.params {
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

fn period_text(period: Option<Value>) -> String {
    match period {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn classify(status: u16, body: &str, resource: &str) -> Result<Outcome<IndustrySeries>, SourceError> {
    let payload: EiaEnvelope = match serde_json::from_str(body) {
        Ok(payload) => payload,
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

    if let Some(error) = payload.error {
        let lowered = error.to_ascii_lowercase();
        if lowered.contains("rate limit") || lowered.contains("too many requests") {
            return Ok(Outcome::RateLimited);
        }
        return Ok(Outcome::Malformed(error));
    }

    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            provider: PROVIDER,
            status,
        });
    }

    let Some(response) = payload.response else {
        return Ok(Outcome::Malformed("missing response element".to_string()));
    };
    if response.data.is_empty() {
        return Ok(Outcome::NoData);
    }

    // Rows arrive newest first
    let points: Vec<SeriesPoint> = response
        .data
        .into_iter()
        .rev()
        .map(|row| SeriesPoint {
            value: row.value.as_ref().and_then(numeric_value),
            period: period_text(row.period),
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
impl DataSource for EiaSource {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
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
    fn test_classify_series_with_mixed_value_types() {
        let body = r#"{"response": {"total": 2, "data": [
            {"period": "2023-08", "value": 3.25, "units": "$/GAL"},
            {"period": "2023-07", "value": "3.18", "units": "$/GAL"}
        ]}}"#;

        let Outcome::Data(series) = classify(200, body, "PET.X").expect("ok") else {
            panic!("Expected data");
        };
        assert_eq!(series.points.len(), 2);
        assert_eq!(series.points[0].period, "2023-07");
        assert_eq!(series.points[0].value, Some(3.18));
        assert_eq!(series.points[1].value, Some(3.25));
    }

    #[test]
    fn test_classify_numeric_period() {
        let body = r#"{"response": {"total": 1, "data": [{"period": 2023, "value": 100.0}]}}"#;
        let Outcome::Data(series) = classify(200, body, "X").expect("ok") else {
            panic!("Expected data");
        };
        assert_eq!(series.points[0].period, "2023");
    }

    #[test]
    fn test_classify_empty_data_is_no_data() {
        let body = r#"{"response": {"total": 0, "data": []}}"#;
        assert_eq!(classify(200, body, "X").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_rate_limit_error() {
        let body = r#"{"error": "You have exceeded your API rate limit; please slow down."}"#;
        assert_eq!(classify(403, body, "X").expect("ok"), Outcome::RateLimited);
    }

    #[test]
    fn test_classify_other_error_is_malformed() {
        let body = r#"{"error": "API key validation error."}"#;
        assert!(matches!(classify(403, body, "X").expect("ok"), Outcome::Malformed(_)));
    }

    #[test]
    fn test_classify_error_status_raises() {
        let err = classify(500, "oops", "X").unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let source = EiaSource::new(Arc::new(CacheService::in_memory()), ProviderConfig::default());

        assert!(!source.is_available());
        let err = source
            .fetch_industry_data(&SourceQuery::new("PET.X"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_freshness_reflects_cached_entry() {
        let cache = Arc::new(CacheService::in_memory());
        let source = EiaSource::new(cache.clone(), ProviderConfig::with_key("k"))
            .with_base_url("http://127.0.0.1:0");

        let query = SourceQuery::new("PET.X");
        assert!(source.data_freshness(&query).await.is_none());

        cache
            .set(&query.cache_key(PROVIDER, OP_INDUSTRY), None, 60_000)
            .await;
        assert!(source.data_freshness(&query).await.is_some());
    }
}
