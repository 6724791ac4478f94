//! Market and industry statistics from public data providers, behind a
//! uniform async interface and a tiered TTL cache.
//!
//! Eight adapters (BLS, Census, FRED, World Bank, IMF, Nasdaq Data Link,
//! Alpha Vantage, EIA) implement [`sources::DataSource`]. Responses are
//! cached in memory and on disk with response-outcome-dependent TTLs, so
//! repeated queries and provider outages both degrade gracefully.
//!
//! Entry point: [`DataService::from_env`].

pub mod cache;
pub mod config;
pub mod error;
pub mod service;
pub mod sources;

pub use cache::{CacheService, CacheStats, Lookup, PersistenceService};
pub use error::SourceError;
pub use service::DataService;
pub use sources::{DataSource, IndustrySeries, MarketSize, Outcome, SourceQuery};
