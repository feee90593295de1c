//! Error taxonomy for provider routing

use std::time::Duration;

use thiserror::Error;

use crate::providers::types::ProviderId;

/// Boxed cause carried by a normalised vendor failure
pub type VendorCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the registry, the client pool and the router
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Name does not belong to the fixed provider set
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Selection criterion is not one of speed/quality/reliability/cost/balanced
    #[error("unknown selection criterion: {0}")]
    UnknownCriterion(String),

    /// Task kind is not one of chat/analysis/quick/bulk
    #[error("unknown task kind: {0}")]
    UnknownTask(String),

    /// Credential environment variable is unset or empty
    #[error("{provider} credential missing: set {env_var}")]
    CredentialMissing {
        provider: ProviderId,
        env_var: String,
    },

    /// Any failure coming out of a vendor call (transport, auth, status, decode)
    #[error("{provider} call failed: {source}")]
    VendorCall {
        provider: ProviderId,
        status: Option<u16>,
        #[source]
        source: VendorCause,
    },

    /// A single attempt exceeded the per-attempt deadline
    #[error("{provider} did not answer within {after:?}")]
    Timeout { provider: ProviderId, after: Duration },

    /// Every candidate provider failed
    #[error("all providers failed (tried: {})", format_attempted(.attempted))]
    AllProvidersExhausted { attempted: Vec<ProviderId> },

    /// Invalid client configuration (base URL, HTTP client build)
    #[error("configuration error: {0}")]
    Config(String),
}

fn format_attempted(attempted: &[ProviderId]) -> String {
    if attempted.is_empty() {
        return "none".to_string();
    }
    attempted
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProviderError {
    /// Build a vendor failure from an HTTP status and response body
    pub fn http_status(provider: ProviderId, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::VendorCall {
            provider,
            status: Some(status),
            source: format!("status {}: {}", status, body).into(),
        }
    }

    /// Wrap any vendor-side error without a status code
    pub fn vendor(provider: ProviderId, source: impl Into<VendorCause>) -> Self {
        Self::VendorCall {
            provider,
            status: None,
            source: source.into(),
        }
    }

    /// Provider this error is attributed to, if any
    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            Self::CredentialMissing { provider, .. }
            | Self::VendorCall { provider, .. }
            | Self::Timeout { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    /// Whether another attempt against the same provider may succeed
    /// (rate limit, server error, timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::VendorCall {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            Self::VendorCall {
                status: None,
                source,
                ..
            } => is_retryable_message(&source.to_string()),
            _ => false,
        }
    }
}

/// Determine from an error message whether it looks transient
fn is_retryable_message(err: &str) -> bool {
    let retryable_patterns = [
        "rate limit",
        "rate_limit",
        "overloaded",
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "temporarily unavailable",
    ];
    let lower = err.to_lowercase();
    retryable_patterns.iter().any(|p| lower.contains(p))
}
