//! U.S. Bureau of Labor Statistics source.
//!
//! BLS is the one POST-shaped provider: the series request (and the
//! registration key, when present) travel in a JSON body. Without a key the
//! source still works against the v1 endpoint in a reduced anonymous mode
//! with tighter daily quotas; the quota trip is reported in-payload as a
//! `REQUEST_NOT_PROCESSED` status with a threshold message.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::cache::{CacheService, CacheStats};
use crate::config::ProviderConfig;
use crate::error::SourceError;

use super::{
    market_size_outcome, DataSource, IndustrySeries, MarketSize, Outcome, SeriesPoint, SourceCore,
    SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "bls";

/// v2 endpoint, used when a registration key is configured
const BLS_V2_URL: &str = "https://api.bls.gov/publicAPI/v2/timeseries/data/";

/// v1 endpoint for anonymous (reduced-quota) access
const BLS_V1_URL: &str = "https://api.bls.gov/publicAPI/v1/timeseries/data/";

#[derive(Debug, Deserialize)]
struct BlsResponse {
    status: String,
    #[serde(default)]
    message: Vec<String>,
    #[serde(rename = "Results", default)]
    results: Option<BlsResults>,
}

#[derive(Debug, Deserialize)]
struct BlsResults {
    #[serde(default)]
    series: Vec<BlsSeries>,
}

#[derive(Debug, Deserialize)]
struct BlsSeries {
    #[serde(default)]
    data: Vec<BlsDataPoint>,
}

#[derive(Debug, Deserialize)]
struct BlsDataPoint {
    year: String,
    period: String,
    value: String,
}

/// Data source for BLS time series. A key is optional.
pub struct BlsSource {
    http: Client,
    core: SourceCore,
    api_key: Option<String>,
    base_url: String,
}

impl BlsSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        let base_url = if config.api_key.is_some() {
            info!(provider = PROVIDER, "BLS source configured with registration key");
            BLS_V2_URL
        } else {
            info!(
                provider = PROVIDER,
                "BLS_API_KEY not set; using anonymous v1 endpoint with reduced quotas"
            );
            BLS_V1_URL
        };
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            api_key: config.api_key,
            base_url: base_url.to_string(),
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
        let mut body = serde_json::Map::new();
        body.insert("seriesid".to_string(), json!([query.resource]));
        for (name, value) in &query.params {
            body.insert(name.clone(), json!(value));
        }
        if let Some(key) = &self.api_key {
            body.insert("registrationkey".to_string(), json!(key));
        }

        let response = self
            .http
            .post(&self.base_url)
            .json(&body)
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

fn classify(body: &str, resource: &str) -> Outcome<IndustrySeries> {
    let payload: BlsResponse = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(e) => return Outcome::Malformed(format!("unparseable response: {e}")),
    };

    if payload.status != "REQUEST_SUCCEEDED" {
        let message = payload.message.join("; ");
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("threshold") || lowered.contains("daily") {
            return Outcome::RateLimited;
        }
        return Outcome::Malformed(format!("status {}: {message}", payload.status));
    }

    let Some(results) = payload.results else {
        return Outcome::Malformed("REQUEST_SUCCEEDED without Results".to_string());
    };
    let Some(series) = results.series.into_iter().next() else {
        return Outcome::NoData;
    };
    if series.data.is_empty() {
        return Outcome::NoData;
    }

    // BLS reports newest first; normalize to chronological order
    let points: Vec<SeriesPoint> = series
        .data
        .into_iter()
        .rev()
        .map(|point| SeriesPoint {
            period: format!("{}-{}", point.year, point.period),
            value: point.value.trim().parse().ok(),
        })
        .collect();

    Outcome::Data(IndustrySeries {
        provider: PROVIDER.to_string(),
        resource: resource.to_string(),
        points,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl DataSource for BlsSource {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    /// Always available; anonymous access is a reduced mode, not an outage.
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
    fn test_classify_success_reverses_to_chronological() {
        let body = r#"{
            "status": "REQUEST_SUCCEEDED",
            "responseTime": 120,
            "message": [],
            "Results": {"series": [{"seriesID": "CES0000000001", "data": [
                {"year": "2023", "period": "M08", "periodName": "August", "value": "156419"},
                {"year": "2023", "period": "M07", "periodName": "July", "value": "156232"}
            ]}]}
        }"#;

        let Outcome::Data(series) = classify(body, "CES0000000001") else {
            panic!("Expected data");
        };
        assert_eq!(series.points.len(), 2);
        assert_eq!(series.points[0].period, "2023-M07");
        assert_eq!(series.points[0].value, Some(156_232.0));
        assert_eq!(series.points[1].period, "2023-M08");
    }

    #[test]
    fn test_classify_dash_sentinel_reads_as_gap() {
        let body = r#"{
            "status": "REQUEST_SUCCEEDED",
            "Results": {"series": [{"data": [
                {"year": "2023", "period": "M08", "value": "-"},
                {"year": "2023", "period": "M07", "value": "100.5"}
            ]}]}
        }"#;

        let Outcome::Data(series) = classify(body, "X") else {
            panic!("Expected data");
        };
        assert_eq!(series.points[1].value, None);
    }

    #[test]
    fn test_classify_empty_data_is_no_data() {
        let body = r#"{"status": "REQUEST_SUCCEEDED", "Results": {"series": [{"data": []}]}}"#;
        assert_eq!(classify(body, "X"), Outcome::NoData);

        let body = r#"{"status": "REQUEST_SUCCEEDED", "Results": {"series": []}}"#;
        assert_eq!(classify(body, "X"), Outcome::NoData);
    }

    #[test]
    fn test_classify_daily_threshold_is_rate_limit() {
        let body = r#"{
            "status": "REQUEST_NOT_PROCESSED",
            "message": ["Request could not be serviced, as the daily threshold for total queries allocated to the user has been reached."]
        }"#;
        assert_eq!(classify(body, "X"), Outcome::RateLimited);
    }

    #[test]
    fn test_classify_other_failure_is_malformed() {
        let body = r#"{"status": "REQUEST_NOT_PROCESSED", "message": ["Series does not exist"]}"#;
        assert!(matches!(classify(body, "X"), Outcome::Malformed(_)));
    }

    #[test]
    fn test_classify_unparseable_body_is_malformed() {
        assert!(matches!(classify("<html>503</html>", "X"), Outcome::Malformed(_)));
    }

    #[tokio::test]
    async fn test_anonymous_source_is_available() {
        let source = BlsSource::new(Arc::new(CacheService::in_memory()), ProviderConfig::default());
        assert!(source.is_available());
        assert_eq!(source.base_url, BLS_V1_URL);
    }

    #[tokio::test]
    async fn test_keyed_source_uses_v2() {
        let source = BlsSource::new(
            Arc::new(CacheService::in_memory()),
            ProviderConfig::with_key("k"),
        );
        assert_eq!(source.base_url, BLS_V2_URL);
    }

    #[tokio::test]
    async fn test_cached_negative_suppresses_upstream_call() {
        let cache = Arc::new(CacheService::in_memory());
        let source = BlsSource::new(cache.clone(), ProviderConfig::default())
            .with_base_url("http://127.0.0.1:0");

        let query = SourceQuery::new("CES0000000001").with_param("startyear", "2020");
        cache
            .set(&query.cache_key(PROVIDER, OP_INDUSTRY), None, 60_000)
            .await;

        // A cached negative is a hit; no network attempt happens
        let fetched = source
            .fetch_industry_data(&query)
            .await
            .expect("Should serve cached negative");
        assert_eq!(fetched, None);
    }
}
