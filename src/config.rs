//! Configuration resolver for providers.
//!
//! Credentials and TTL tiers are read from the process environment at
//! adapter construction. Every TTL tier has a documented default; an
//! unparsable override is logged once and the default is used, never a
//! fatal error.
//!
//! Environment layout per provider (tag is the upper-cased provider name,
//! e.g. `FRED`, `WORLD_BANK`):
//!
//! - `<TAG>_API_KEY` — credential, where the provider needs one
//! - `CACHE_TTL_<TAG>_MS` — success tier
//! - `CACHE_TTL_<TAG>_NODATA_MS` — no-data / malformed tier
//! - `CACHE_TTL_<TAG>_RATELIMIT_MS` — rate-limit backoff tier

use std::env;

use tracing::warn;

/// Default TTL for successful fetches: 24 hours
pub const DEFAULT_SUCCESS_TTL_MS: u64 = 86_400_000;

/// Default TTL for cached no-data and malformed outcomes: 1 hour
pub const DEFAULT_NO_DATA_TTL_MS: u64 = 3_600_000;

/// Default TTL for rate-limit backoff: 6 hours
pub const DEFAULT_RATE_LIMIT_TTL_MS: u64 = 21_600_000;

/// The three outcome-class TTL tiers, each independently configurable per
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTiers {
    /// TTL applied to successful fetches
    pub success_ms: u64,
    /// TTL applied to confirmed no-data and malformed outcomes
    pub no_data_ms: u64,
    /// TTL applied when the provider reports a rate limit
    pub rate_limit_ms: u64,
}

impl Default for TtlTiers {
    fn default() -> Self {
        Self {
            success_ms: DEFAULT_SUCCESS_TTL_MS,
            no_data_ms: DEFAULT_NO_DATA_TTL_MS,
            rate_limit_ms: DEFAULT_RATE_LIMIT_TTL_MS,
        }
    }
}

impl TtlTiers {
    /// Resolves the tiers for a provider from the environment, falling back
    /// to the defaults for unset or unparsable overrides.
    pub fn from_env(provider: &str) -> Self {
        let tag = env_tag(provider);
        Self {
            success_ms: resolve_override(
                &format!("CACHE_TTL_{tag}_MS"),
                DEFAULT_SUCCESS_TTL_MS,
            ),
            no_data_ms: resolve_override(
                &format!("CACHE_TTL_{tag}_NODATA_MS"),
                DEFAULT_NO_DATA_TTL_MS,
            ),
            rate_limit_ms: resolve_override(
                &format!("CACHE_TTL_{tag}_RATELIMIT_MS"),
                DEFAULT_RATE_LIMIT_TTL_MS,
            ),
        }
    }
}

/// Credential and TTL configuration handed to an adapter at construction.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// API credential, absent when unset or blank
    pub api_key: Option<String>,
    /// Outcome-class TTL tiers
    pub ttl: TtlTiers,
}

impl ProviderConfig {
    /// Resolves a provider's configuration from the environment.
    pub fn from_env(provider: &str) -> Self {
        let tag = env_tag(provider);
        let api_key = env::var(format!("{tag}_API_KEY"))
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Self {
            api_key,
            ttl: TtlTiers::from_env(provider),
        }
    }

    /// Builds a configuration with an explicit key and default TTLs.
    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ttl: TtlTiers::default(),
        }
    }
}

/// Maps a provider name to its environment-variable tag.
fn env_tag(provider: &str) -> String {
    provider.to_ascii_uppercase()
}

/// Reads an override variable, parsing it with [`parse_ttl_override`].
fn resolve_override(var: &str, default: u64) -> u64 {
    match env::var(var) {
        Ok(raw) => parse_ttl_override(var, &raw, default),
        Err(_) => default,
    }
}

/// Parses one TTL override. Zero or unparsable values fall back to the
/// default with a warning; they must never abort construction.
fn parse_ttl_override(var: &str, raw: &str, default: u64) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => ms,
        _ => {
            warn!(var, raw, default_ms = default, "Unparsable cache TTL override, using default");
            default
        }
    }
}
