//! Alpha Vantage source.
//!
//! Covers the economic-indicator endpoints (`REAL_GDP`, `CPI`,
//! `UNEMPLOYMENT`, ...), which answer `{"name", "interval", "unit",
//! "data": [{"date", "value"}]}`. Alpha Vantage never uses HTTP status for
//! its own throttle: quota trips arrive as an HTTP 200 payload containing
//! only a `Note` (or `Information`) message, which is the in-payload
//! rate-limit marker. An API key is required.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::{CacheService, CacheStats};
use crate::config::ProviderConfig;
use crate::error::SourceError;

use super::{
    market_size_outcome, DataSource, IndustrySeries, MarketSize, Outcome, SeriesPoint, SourceCore,
    SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "alpha_vantage";

const ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Debug, Deserialize)]
struct AlphaVantageResponse {
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(default)]
    data: Option<Vec<AlphaVantagePoint>>,
}

#[derive(Debug, Deserialize)]
struct AlphaVantagePoint {
    date: String,
    value: String,
}

/// Data source for Alpha Vantage economic indicators. Requires
/// `ALPHA_VANTAGE_API_KEY`. The query resource is the function name.
pub struct AlphaVantageSource {
    http: Client,
    core: SourceCore,
    api_key: Option<String>,
    base_url: String,
}

impl AlphaVantageSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        if config.api_key.is_some() {
            info!(provider = PROVIDER, "Alpha Vantage source configured");
        } else {
            warn!(
                provider = PROVIDER,
                "ALPHA_VANTAGE_API_KEY not set; source unavailable"
            );
        }
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            api_key: config.api_key,
            base_url: ALPHA_VANTAGE_BASE_URL.to_string(),
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
                var: "ALPHA_VANTAGE_API_KEY",
            })
    }

    async fn fetch_series(
        &self,
        query: &SourceQuery,
    ) -> Result<Outcome<IndustrySeries>, SourceError> {
        let api_key = self.require_key()?;
        let mut url = format!(
            "{}?function={}&apikey={}",
            self.base_url, query.resource, api_key
        );
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
        if !(200..300).contains(&status) {
            return Err(SourceError::Status {
                provider: PROVIDER,
                status,
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::transport(PROVIDER, e))?;

        Ok(classify(&body, &query.resource))
    }
}

fn is_empty_object(body: &str) -> bool {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(body)
        .map(|object| object.is_empty())
        .unwrap_or(false)
}

fn classify(body: &str, resource: &str) -> Outcome<IndustrySeries> {
    let payload: AlphaVantageResponse = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(e) => return Outcome::Malformed(format!("unparseable response: {e}")),
    };

    if payload.note.is_some() || payload.information.is_some() {
        return Outcome::RateLimited;
    }
    if payload.error_message.is_some() {
        // Unknown function or symbol: confirmed nothing to fetch
        return Outcome::NoData;
    }
    let Some(data) = payload.data else {
        // Alpha Vantage answers some bad requests with a bare "{}"; an
        // object with fields this adapter does not recognize is a
        // different situation, likely an upstream contract change
        if is_empty_object(body) {
            return Outcome::NoData;
        }
        return Outcome::Malformed(
            "response carried neither a data array nor a recognized marker".to_string(),
        );
    };
    if data.is_empty() {
        return Outcome::NoData;
    }

    // Points arrive newest first
    let points: Vec<SeriesPoint> = data
        .into_iter()
        .rev()
        .map(|point| SeriesPoint {
            period: point.date,
            value: point.value.trim().parse().ok(),
        })
        .collect();
    if points.iter().all(|p| p.value.is_none()) {
        return Outcome::NoData;
    }

    Outcome::Data(IndustrySeries {
        provider: PROVIDER.to_string(),
        resource: resource.to_string(),
        points,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl DataSource for AlphaVantageSource {
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
    fn test_classify_economic_series() {
        let body = r#"{
            "name": "Real Gross Domestic Product",
            "interval": "annual",
            "unit": "billions of dollars",
            "data": [
                {"date": "2023-01-01", "value": "22376.9"},
                {"date": "2022-01-01", "value": "21822.0"}
            ]
        }"#;

        let Outcome::Data(series) = classify(body, "REAL_GDP") else {
            panic!("Expected data");
        };
        assert_eq!(series.points.len(), 2);
        assert_eq!(series.points[0].period, "2022-01-01");
        assert_eq!(series.points[1].value, Some(22376.9));
    }

    #[test]
    fn test_classify_note_is_rate_limit() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day."}"#;
        assert_eq!(classify(body, "CPI"), Outcome::RateLimited);
    }

    #[test]
    fn test_classify_information_is_rate_limit() {
        let body = r#"{"Information": "API call frequency limit reached."}"#;
        assert_eq!(classify(body, "CPI"), Outcome::RateLimited);
    }

    #[test]
    fn test_classify_error_message_is_no_data() {
        let body = r#"{"Error Message": "Invalid API call. Please retry or visit the documentation."}"#;
        assert_eq!(classify(body, "BOGUS"), Outcome::NoData);
    }

    #[test]
    fn test_classify_empty_object_is_no_data() {
        assert_eq!(classify("{}", "CPI"), Outcome::NoData);
        assert_eq!(classify(r#"{"data": []}"#, "CPI"), Outcome::NoData);
    }

    #[test]
    fn test_classify_dot_sentinels_only_is_no_data() {
        let body = r#"{"data": [{"date": "2023-01-01", "value": "."}]}"#;
        assert_eq!(classify(body, "CPI"), Outcome::NoData);
    }

    #[test]
    fn test_classify_unparseable_is_malformed() {
        assert!(matches!(classify("not json", "CPI"), Outcome::Malformed(_)));
    }

    #[test]
    fn test_classify_unrecognized_object_is_malformed() {
        // A shape change upstream must not be mistaken for "no data"
        let body = r#"{"Realtime Currency Exchange Rate": {"1. From_Currency Code": "USD"}}"#;
        assert!(matches!(classify(body, "CPI"), Outcome::Malformed(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let source = AlphaVantageSource::new(
            Arc::new(CacheService::in_memory()),
            ProviderConfig::default(),
        );

        assert!(!source.is_available());
        let err = source
            .fetch_industry_data(&SourceQuery::new("REAL_GDP"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_cached_negative_suppresses_upstream_call() {
        let cache = Arc::new(CacheService::in_memory());
        let source = AlphaVantageSource::new(cache.clone(), ProviderConfig::with_key("k"))
            .with_base_url("http://127.0.0.1:0");

        let query = SourceQuery::new("REAL_GDP").with_param("interval", "annual");
        cache
            .set(&query.cache_key(PROVIDER, OP_INDUSTRY), None, 60_000)
            .await;

        let fetched = source
            .fetch_industry_data(&query)
            .await
            .expect("Should serve cached negative");
        assert_eq!(fetched, None);
    }
}
