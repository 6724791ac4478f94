//! IMF SDMX CompactData source.
//!
//! Keyless GET API over SDMX-JSON. The payload nests observations under
//! `CompactData.DataSet.Series.Obs` with attribute-prefixed field names
//! (`@TIME_PERIOD`, `@OBS_VALUE`), and both `Series` and `Obs` collapse to
//! a bare object when there is exactly one of them. Quota trips come back
//! as a message document rather than JSON.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::cache::{CacheService, CacheStats};
use crate::config::ProviderConfig;
use crate::error::SourceError;

use super::{
    market_size_outcome, DataSource, IndustrySeries, MarketSize, Outcome, SeriesPoint, SourceCore,
    SourceQuery, OP_INDUSTRY, OP_MARKET_SIZE,
};

const PROVIDER: &str = "imf";

const IMF_BASE_URL: &str = "http://dataservices.imf.org/REST/SDMX_JSON.svc/CompactData";

/// SDMX collapses single-element collections to a bare object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImfResponse {
    #[serde(rename = "CompactData")]
    compact_data: Option<ImfCompactData>,
}

#[derive(Debug, Deserialize)]
struct ImfCompactData {
    #[serde(rename = "DataSet")]
    data_set: Option<ImfDataSet>,
}

#[derive(Debug, Deserialize)]
struct ImfDataSet {
    #[serde(rename = "Series")]
    series: Option<OneOrMany<ImfSeries>>,
}

#[derive(Debug, Deserialize)]
struct ImfSeries {
    #[serde(rename = "Obs")]
    obs: Option<OneOrMany<ImfObs>>,
}

#[derive(Debug, Deserialize)]
struct ImfObs {
    #[serde(rename = "@TIME_PERIOD")]
    time_period: Option<String>,
    #[serde(rename = "@OBS_VALUE")]
    obs_value: Option<String>,
}

/// Data source for IMF statistical series. No credential required. The
/// query resource is the SDMX key path, e.g. `IFS/M.US.PMP_IX`.
pub struct ImfSource {
    http: Client,
    core: SourceCore,
    base_url: String,
}

impl ImfSource {
    pub fn new(cache: Arc<CacheService>, config: ProviderConfig) -> Self {
        info!(provider = PROVIDER, "IMF source configured (no credential required)");
        Self {
            http: Client::new(),
            core: SourceCore::new(PROVIDER, cache, config.ttl),
            base_url: IMF_BASE_URL.to_string(),
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
        let mut url = format!("{}/{}", self.base_url, query.resource);
        let mut sep = '?';
        for (name, value) in &query.params {
            url.push(sep);
            url.push_str(&format!("{name}={value}"));
            sep = '&';
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
    let payload: ImfResponse = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(_) => {
            let lowered = body.to_ascii_lowercase();
            if lowered.contains("rate limit") || lowered.contains("too many requests") {
                return Ok(Outcome::RateLimited);
            }
            if !(200..300).contains(&status) {
                return Err(SourceError::Status {
                    provider: PROVIDER,
                    status,
                });
            }
            return Ok(Outcome::Malformed("response body is not SDMX JSON".to_string()));
        }
    };

    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            provider: PROVIDER,
            status,
        });
    }

    let Some(compact) = payload.compact_data else {
        return Ok(Outcome::Malformed("missing CompactData element".to_string()));
    };
    let series = compact
        .data_set
        .and_then(|ds| ds.series)
        .map(OneOrMany::into_vec)
        .unwrap_or_default();
    // Several series can match a broad key; take the first
    let Some(first) = series.into_iter().next() else {
        return Ok(Outcome::NoData);
    };
    let observations = first.obs.map(OneOrMany::into_vec).unwrap_or_default();
    if observations.is_empty() {
        return Ok(Outcome::NoData);
    }

    let points: Vec<SeriesPoint> = observations
        .into_iter()
        .map(|obs| SeriesPoint {
            period: obs.time_period.unwrap_or_default(),
            value: obs.obs_value.and_then(|v| v.trim().parse().ok()),
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
impl DataSource for ImfSource {
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
