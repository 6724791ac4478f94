//! FRED (Federal Reserve Economic Data) source.
//!
//! Fetches series observations from the St. Louis Fed with the API key as a
//! query parameter. FRED marks missing observations with a `"."` value
//! sentinel and reports its own throttle as an in-payload `error_code` 429,
//! distinct from transport-level failures.

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

const PROVIDER: &str = "fred";

/// Base URL for the FRED observations endpoint
const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

/// FRED response envelope; error fields and observations never coexist.
#[derive(Debug, Deserialize)]
struct FredResponse {
    #[serde(default)]
    observations: Option<Vec<FredObservation>>,
    #[serde(default)]
    error_code: Option<u32>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

/// Data source for FRED time series. Requires `FRED_API_KEY`.
pub struct FredSource {
    http: Client,
    core: SourceCore,
    api_key: Option<String>,
    base_url: String,
}

impl FredSource {
    /// Creates the source; availability is decided and logged here, once.
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        if config.api_key.is_some() {
            info!(provider = PROVIDER, "FRED source configured");
        } else {
            warn!(provider = PROVIDER, "FRED_API_KEY not set; source unavailable");
        }
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            api_key: config.api_key,
            base_url: FRED_BASE_URL.to_string(),
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
                var: "FRED_API_KEY",
            })
    }

    /// Performs the upstream call and classifies the response.
    async fn fetch_series(
        &self,
        query: &SourceQuery,
    ) -> Result<Outcome<IndustrySeries>, SourceError> {
        let api_key = self.require_key()?;
        let mut url = format!(
            "{}?series_id={}&api_key={}&file_type=json",
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
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::transport(PROVIDER, e))?;

        classify(status, &body, &query.resource)
    }
}

/// Maps a raw FRED response onto exactly one outcome class.
fn classify(status: u16, body: &str, resource: &str) -> Result<Outcome<IndustrySeries>, SourceError> {
    if let Ok(payload) = serde_json::from_str::<FredResponse>(body) {
        if payload.error_code == Some(429) {
            return Ok(Outcome::RateLimited);
        }
        if let Some(message) = payload.error_message {
            // e.g. an unknown series id; confirmed "nothing here"
            if payload.error_code == Some(400) {
                return Ok(Outcome::NoData);
            }
            return Ok(Outcome::Malformed(message));
        }
        if let Some(observations) = payload.observations {
            if observations.is_empty() {
                return Ok(Outcome::NoData);
            }
            let points: Vec<SeriesPoint> = observations
                .into_iter()
                .map(|obs| SeriesPoint {
                    period: obs.date,
                    value: obs.value.trim().parse().ok(),
                })
                .collect();
            if points.iter().all(|p| p.value.is_none()) {
                // Every observation was the "." sentinel
                return Ok(Outcome::NoData);
            }
            return Ok(Outcome::Data(IndustrySeries {
                provider: PROVIDER.to_string(),
                resource: resource.to_string(),
                points,
                fetched_at: Utc::now(),
            }));
        }
    }

    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            provider: PROVIDER,
            status,
        });
    }
    Ok(Outcome::Malformed(
        "response carried neither observations nor a recognized error".to_string(),
    ))
}

#[async_trait]
impl DataSource for FredSource {
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
    fn test_classify_success_with_sentinel_gap() {
        let body = r#"{
            "realtime_start": "2024-01-01",
            "observations": [
                {"realtime_start": "2024-01-01", "date": "2022-01-01", "value": "25462.7"},
                {"realtime_start": "2024-01-01", "date": "2022-04-01", "value": "."},
                {"realtime_start": "2024-01-01", "date": "2022-07-01", "value": "25723.9"}
            ]
        }"#;

        let outcome = classify(200, body, "GDP").expect("Should classify");
        let Outcome::Data(series) = outcome else {
            panic!("Expected data, got {outcome:?}");
        };
        assert_eq!(series.points.len(), 3);
        assert_eq!(series.points[0].value, Some(25462.7));
        assert_eq!(series.points[1].value, None);
        assert_eq!(series.points[1].period, "2022-04-01");
    }

    #[test]
    fn test_classify_empty_observations_is_no_data() {
        let body = r#"{"observations": []}"#;
        assert_eq!(classify(200, body, "GDP").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_all_sentinels_is_no_data() {
        let body = r#"{"observations": [
            {"date": "2022-01-01", "value": "."},
            {"date": "2022-04-01", "value": "."}
        ]}"#;
        assert_eq!(classify(200, body, "GDP").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_in_payload_rate_limit() {
        let body = r#"{"error_code": 429, "error_message": "Too Many Requests."}"#;
        assert_eq!(classify(429, body, "GDP").expect("ok"), Outcome::RateLimited);
    }

    #[test]
    fn test_classify_unknown_series_is_no_data() {
        let body = r#"{"error_code": 400, "error_message": "Bad Request. The series does not exist."}"#;
        assert_eq!(classify(400, body, "NOPE").expect("ok"), Outcome::NoData);
    }

    #[test]
    fn test_classify_non_success_without_marker_raises() {
        let err = classify(503, "upstream unavailable", "GDP").unwrap_err();
        assert!(matches!(
            err,
            SourceError::Status {
                provider: "fred",
                status: 503
            }
        ));
    }

    #[test]
    fn test_classify_unexpected_shape_is_malformed() {
        let body = r#"{"surprise": true}"#;
        assert!(matches!(
            classify(200, body, "GDP").expect("ok"),
            Outcome::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let source = FredSource::new(Arc::new(CacheService::in_memory()), ProviderConfig::default());

        assert!(!source.is_available());
        let err = source
            .fetch_industry_data(&SourceQuery::new("GDP"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_cached_series_served_without_upstream_call() {
        let cache = Arc::new(CacheService::in_memory());
        // Unroutable base URL: any network attempt would error
        let source = FredSource::new(cache.clone(), ProviderConfig::with_key("test-key"))
            .with_base_url("http://127.0.0.1:0");

        let query = SourceQuery::new("GDP");
        let series = IndustrySeries {
            provider: PROVIDER.to_string(),
            resource: "GDP".to_string(),
            points: vec![SeriesPoint {
                period: "2023-01-01".to_string(),
                value: Some(26.1),
            }],
            fetched_at: Utc::now(),
        };
        cache
            .set(
                &query.cache_key(PROVIDER, OP_INDUSTRY),
                Some(serde_json::to_value(&series).expect("serialize")),
                60_000,
            )
            .await;

        let fetched = source
            .fetch_industry_data(&query)
            .await
            .expect("Should hit cache, not network");
        assert_eq!(fetched, Some(series));
    }

    #[tokio::test]
    async fn test_freshness_none_before_first_fetch() {
        let source = FredSource::new(Arc::new(CacheService::in_memory()), ProviderConfig::default());
        assert!(source.data_freshness(&SourceQuery::new("GDP")).await.is_none());
    }
}
