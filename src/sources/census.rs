//! U.S. Census Bureau source.
//!
//! Census answers as a bare JSON array-of-arrays whose first row is the
//! column header, e.g. for County Business Patterns:
//!
//! ```text
//! [["NAICS2017","ESTAB","EMP","PAYANN","us"],
//!  ["5411","190191","1148130","114380540","1"]]
//! ```
//!
//! A key is optional for low request volumes, so the source stays available
//! without one. An empty body (or HTTP 204) is the confirmed no-data
//! marker; quota exhaustion arrives as a plain-text body rather than JSON.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheService, CacheStats};
use crate::config::ProviderConfig;
use crate::error::SourceError;

use super::{
    market_size_from_records, series_from_records, DataRecord, DataSource, IndustrySeries,
    MarketSize, Outcome, SourceCore, SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "census";

const CENSUS_BASE_URL: &str = "https://api.census.gov/data";

/// Data source for Census datasets. The query resource is the dataset path
/// (e.g. `2021/cbp`); the variable list and geography go in the params.
pub struct CensusSource {
    http: Client,
    core: SourceCore,
    api_key: Option<String>,
    base_url: String,
}

impl CensusSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        if config.api_key.is_some() {
            info!(provider = PROVIDER, "Census source configured with key");
        } else {
            info!(
                provider = PROVIDER,
                "CENSUS_API_KEY not set; operating anonymously at low request volume"
            );
        }
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            api_key: config.api_key,
            base_url: CENSUS_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_records(
        &self,
        query: &SourceQuery,
    ) -> Result<Outcome<Vec<DataRecord>>, SourceError> {
        let mut url = format!("{}/{}", self.base_url, query.resource);
        let mut sep = '?';
        for (name, value) in &query.params {
            url.push(sep);
            url.push_str(&format!("{name}={value}"));
            sep = '&';
        }
        if let Some(key) = &self.api_key {
            url.push(sep);
            url.push_str(&format!("key={key}"));
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

fn header_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn classify(status: u16, body: &str) -> Result<Outcome<Vec<DataRecord>>, SourceError> {
    // 204 / empty body: the query matched nothing
    if status == 204 || body.trim().is_empty() {
        return Ok(Outcome::NoData);
    }

    let rows: Vec<Vec<Value>> = match serde_json::from_str(body) {
        Ok(rows) => rows,
        Err(_) => {
            let lowered = body.to_ascii_lowercase();
            if lowered.contains("exceeded") || lowered.contains("daily limit") {
                return Ok(Outcome::RateLimited);
            }
            if !(200..300).contains(&status) {
                return Err(SourceError::Status {
                    provider: PROVIDER,
                    status,
                });
            }
            return Ok(Outcome::Malformed(
                "expected a JSON array-of-arrays body".to_string(),
            ));
        }
    };

    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            provider: PROVIDER,
            status,
        });
    }

    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Ok(Outcome::NoData);
    };
    let names: Vec<String> = header.iter().map(header_name).collect();

    let records: Vec<DataRecord> = rows
        .map(|row| {
            let mut record = DataRecord::new();
            for (name, value) in names.iter().zip(row.into_iter()) {
                record.push(name.clone(), value);
            }
            record
        })
        .collect();

    if records.is_empty() {
        // Header row only
        return Ok(Outcome::NoData);
    }
    Ok(Outcome::Data(records))
}

#[async_trait]
impl DataSource for CensusSource {
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
