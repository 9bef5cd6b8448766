//! Router error types.
//!
//! Distinguishes startup faults (missing credentials) from call-time
//! provider failures. The control loops never retry in place; a provider
//! failure aborts the current tier and surfaces to the orchestrator.

use thiserror::Error;

/// Errors raised by the provider router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The API key env var for the requested provider is absent.
    ///
    /// Fatal when the provider is actually needed. The message carries a
    /// remediation hint the user can paste into their shell.
    #[error("Missing credentials for provider '{provider}' -> Fix: set {env_var}=...")]
    MissingCredentials { provider: String, env_var: String },

    /// Transport failure, non-success HTTP status, or unparseable body.
    #[error("Provider '{provider}' call failed ({kind}): {message}")]
    Provider {
        provider: String,
        kind: FailureKind,
        message: String,
    },
}

impl RouterError {
    pub fn provider_failure(
        provider: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Classification of provider call failures.
///
/// Carried for diagnostics only: the core treats every kind the same way
/// (abort tier, escalate or end the run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rate limited (429)
    RateLimited,
    /// Server error (500, 502, 503, 504)
    ServerError,
    /// Client error (400, 401, 403, 404)
    ClientError,
    /// Connection failure or timeout
    NetworkError,
    /// Response body did not match the expected shape
    ParseError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::ServerError => write!(f, "server error"),
            FailureKind::ClientError => write!(f, "client error"),
            FailureKind::NetworkError => write!(f, "network error"),
            FailureKind::ParseError => write!(f, "parse error"),
        }
    }
}

/// Classify an HTTP status code into a failure kind.
pub fn classify_http_status(status: u16) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited,
        500 | 502 | 503 | 504 => FailureKind::ServerError,
        400..=499 => FailureKind::ClientError,
        _ => FailureKind::ServerError,
    }
}
