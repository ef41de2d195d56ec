// Resale listing aggregator: per-site fetchers behind a cache, rate limiter,
// circuit breakers and retry, served over HTTP

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod product;
pub mod rate_limiter;
pub mod retry;
pub mod sample;
pub mod server;
pub mod sources;

// Re-export key types for convenience
pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakers, CircuitSnapshot, CircuitState};
pub use config::{AppConfig, EbayCredentials, ResilienceConfig};
pub use error::{ConfigError, FetchError, ResilienceError};
pub use health::{HealthSnapshot, HealthStatus};
pub use orchestrator::{Admission, FetchOutcome, FetchRequest, OutcomeSource, ResilientFetcher};
pub use product::{Product, SearchQuery, Site};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryError, RetryPolicy};
pub use server::{build_app, AppState, ClientId};
pub use sources::{build_http_client, EbaySource, ListingSource, VestiaireSource, VintedSource};
