// Outbound fetchers, one per marketplace.
// A source performs exactly one search against its site and reports failures
// as `FetchError`; retrying, caching and fallback are the orchestrator's job.

mod ebay;
mod vestiaire;
mod vinted;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};

use crate::{
    error::FetchError,
    product::{Product, SearchQuery, Site},
};

pub use ebay::EbaySource;
pub use vestiaire::VestiaireSource;
pub use vinted::VintedSource;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[async_trait]
pub trait ListingSource: Send + Sync + 'static {
    fn site(&self) -> Site;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, FetchError>;
}

pub fn build_http_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|e| FetchError::Network(e.to_string()))
}

// Turns any non-2xx response into a typed error, reading Retry-After on 429
pub(crate) fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(FetchError::RateLimited { retry_after });
    }

    Err(FetchError::Http {
        status: status.as_u16(),
    })
}

// Empty strings from the sites mean "not provided"
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// Sites disagree on whether prices are strings or numbers
pub(crate) fn parse_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
