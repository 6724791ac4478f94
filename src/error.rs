//! Errors raised across the data-source boundary.
//!
//! Only operational conditions cross the boundary as errors: a missing
//! credential or an unreachable provider. Business outcomes the provider
//! itself reports (no data, rate limited, unrecognized payload) are
//! represented as cached negatives and surface as a normal `None` return.

use thiserror::Error;

/// Error raised by a data source fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A required API credential is not configured. Fails fast at call
    /// time and is never cached.
    #[error("{provider}: missing required API credential ({var})")]
    MissingCredential {
        /// Provider name
        provider: &'static str,
        /// Environment variable that would supply the credential
        var: &'static str,
    },

    /// The HTTP request could not be completed (connect, timeout, body
    /// read). Never cached, so the next call retries against the live
    /// provider.
    #[error("{provider}: request failed: {source}")]
    Transport {
        /// Provider name
        provider: &'static str,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success HTTP status that carries no
    /// recognizable in-payload marker. Never cached.
    #[error("{provider}: unexpected HTTP status {status}")]
    Status {
        /// Provider name
        provider: &'static str,
        /// HTTP status code
        status: u16,
    },
}

impl SourceError {
    /// Wraps a client error as a transport failure for the given provider.
    pub(crate) fn transport(provider: &'static str, source: reqwest::Error) -> Self {
        SourceError::Transport { provider, source }
    }
}
