// Error types for outbound fetches and for the resilience layer wrapped around them

use std::time::Duration;

use thiserror::Error;

// Failure of a single outbound call (scrape, API request, OAuth token exchange)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("Rate limited by dependency (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl FetchError {
    // Network faults, timeouts, 5xx and 429 are worth another attempt.
    // Everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout | FetchError::RateLimited { .. } => true,
            FetchError::Http { status } => *status >= 500 || *status == 429,
            FetchError::Decode(_) | FetchError::MissingCredentials(_) => false,
        }
    }

    // False only for request-specific 4xx (bad query, missing listing).
    // Auth, throttling, 5xx, transport and decode failures count against the site.
    pub fn is_dependency_fault(&self) -> bool {
        match self {
            FetchError::Http { status } => {
                *status >= 500 || matches!(*status, 401 | 403 | 429)
            }
            _ => true,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

// Why an orchestrated fetch resolved to fallback data instead of a live result.
// None of these ever reach the caller as an `Err`: the orchestrator always
// resolves, and attaches one of these to the outcome as a degradation reason.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    #[error("Rate limit exceeded, retry in {wait_time:?}")]
    RateLimitExceeded { wait_time: Duration },

    #[error("Dependency {dependency} temporarily unavailable (circuit open)")]
    DependencyUnavailable { dependency: String },

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    RetryExhausted { attempts: u32, last_error: FetchError },

    #[error("Request failed without retry: {source}")]
    NonRetryable { source: FetchError },

    #[error("Deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        attempts: u32,
        last_error: Option<FetchError>,
    },
}

impl ResilienceError {
    // Local policy rejections and the caller's own bad requests never reach the breaker
    pub fn is_dependency_fault(&self) -> bool {
        match self {
            ResilienceError::RateLimitExceeded { .. }
            | ResilienceError::DependencyUnavailable { .. } => false,
            ResilienceError::NonRetryable { source } => source.is_dependency_fault(),
            ResilienceError::RetryExhausted { .. } | ResilienceError::DeadlineExceeded { .. } => {
                true
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: String, value: String },

    #[error("Configuration error: {0}")]
    Constraint(String),
}
