use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rate limited by gateway")]
    RateLimited { retry_after: Option<Duration> },
    #[error("query failed: {0}")]
    Query(String),
    #[error("invalid dataset id: {0:?}")]
    InvalidDatasetId(String),
    #[error("gateway credential missing")]
    MissingCredential,
    #[error("no gateway URL configured")]
    NoEndpoints,
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Whether the failure looks like a rejected or missing api key.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::MissingCredential => true,
            Self::Status { status, body } => {
                matches!(status, 401 | 403) || ((400..500).contains(status) && mentions_auth(body))
            }
            Self::Query(message) => mentions_auth(message),
            _ => false,
        }
    }

    /// Whether another attempt against a different gateway URL may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Malformed(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }
}

fn mentions_auth(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["auth", "api key", "apikey", "unauthorized", "forbidden"]
        .iter()
        .any(|needle| lower.contains(needle))
}
