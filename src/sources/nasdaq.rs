//! Nasdaq Data Link (formerly Quandl) source.
//!
//! Datasets come back as parallel `column_names` and row arrays; errors use
//! the legacy `quandl_error` envelope whose code prefix distinguishes
//! request-rate rejections (`QEL...`) from unknown datasets (`QEC...`).
//! An API key is required.

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
    market_size_from_records, series_from_records, DataRecord, DataSource, IndustrySeries,
    MarketSize, Outcome, SourceCore, SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "nasdaq";

const NASDAQ_BASE_URL: &str = "https://data.nasdaq.com/api/v3/datasets";

#[derive(Debug, Deserialize)]
struct NasdaqResponse {
    #[serde(default)]
    dataset: Option<NasdaqDataset>,
    #[serde(default)]
    quandl_error: Option<NasdaqError>,
}

#[derive(Debug, Deserialize)]
struct NasdaqDataset {
    #[serde(default)]
    column_names: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct NasdaqError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Data source for Nasdaq Data Link datasets. Requires `NASDAQ_API_KEY`.
/// The query resource is the dataset code, e.g. `FRED/GDP` or `WIKI/AAPL`.
pub struct NasdaqSource {
    http: Client,
    core: SourceCore,
    api_key: Option<String>,
    base_url: String,
}

impl NasdaqSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        if config.api_key.is_some() {
            info!(provider = PROVIDER, "Nasdaq Data Link source configured");
        } else {
            warn!(provider = PROVIDER, "NASDAQ_API_KEY not set; source unavailable");
        }
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            api_key: config.api_key,
            base_url: NASDAQ_BASE_URL.to_string(),
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
                var: "NASDAQ_API_KEY",
            })
    }

    async fn fetch_records(
        &self,
        query: &SourceQuery,
    ) -> Result<Outcome<Vec<DataRecord>>, SourceError> {
        let api_key = self.require_key()?;
        let mut url = format!("{}/{}.json?api_key={}", self.base_url, query.resource, api_key);
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

        classify(status, &body)
    }
}

fn classify(status: u16, body: &str) -> Result<Outcome<Vec<DataRecord>>, SourceError> {
    let payload: NasdaqResponse = match serde_json::from_str(body) {
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

    if let Some(error) = payload.quandl_error {
        if error.code.starts_with("QEL") {
            return Ok(Outcome::RateLimited);
        }
        if error.code.starts_with("QEC") {
            // Unknown dataset code: confirmed nothing to fetch
            return Ok(Outcome::NoData);
        }
        return Ok(Outcome::Malformed(format!("{}: {}", error.code, error.message)));
    }

    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            provider: PROVIDER,
            status,
        });
    }

    let Some(dataset) = payload.dataset else {
        return Ok(Outcome::Malformed("missing dataset element".to_string()));
    };
    if dataset.data.is_empty() {
        return Ok(Outcome::NoData);
    }

    // Rows arrive newest first; normalize to chronological order
    let records: Vec<DataRecord> = dataset
        .data
        .into_iter()
        .rev()
        .map(|row| {
            let mut record = DataRecord::new();
            for (name, value) in dataset.column_names.iter().zip(row.into_iter()) {
                record.push(name.clone(), value);
            }
            record
        })
        .collect();
    Ok(Outcome::Data(records))
}

#[async_trait]
impl DataSource for NasdaqSource {
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
        let outcome = self.fetch_records(query).await?.and_then(|records| {
            series_from_records(PROVIDER, &query.resource, &records, query.measure.as_deref())
        });
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
        let outcome = self.fetch_records(query).await?.and_then(|records| {
            match market_size_from_records(PROVIDER, &records, query.measure.as_deref()) {
                Some(size) => Outcome::Data(size),
                None => Outcome::NoData,
            }
        });
        Ok(self.core.store(&key, outcome).await)
    }

    async fn data_freshness(&self, query: &SourceQuery) -> Option<DateTime<Utc>> {
        self.core.freshness(query).await
    }

    fn cache_status(&self) -> CacheStats {
        self.core.stats()
    }
}
