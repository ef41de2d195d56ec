// Process configuration, read once at startup from the environment

use std::{net::SocketAddr, str::FromStr, time::Duration};

use crate::{cache::CacheConfig, error::ConfigError, retry::RetryPolicy};

// Settings for the resilience layer wrapped around every outbound call
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub cache: CacheConfig,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max_wait: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
    pub retry: RetryPolicy,
    pub fetch_deadline: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rate_limit_max_requests: 20,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_wait: Duration::from_secs(5),
            breaker_failure_threshold: 3,
            breaker_recovery_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            fetch_deadline: Duration::from_secs(30),
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_max_requests == 0 {
            return Err(ConfigError::Constraint(
                "rate limit must admit at least one request per window".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::Constraint(
                "circuit breaker failure threshold must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Constraint(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Constraint(format!(
                "retry jitter must be in [0, 1), got {}",
                self.retry.jitter_factor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EbayCredentials {
    pub app_id: String,
    pub cert_id: String,
    pub sandbox: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub http_timeout: Duration,
    pub resilience: ResilienceConfig,
    pub ebay: Option<EbayCredentials>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = ResilienceConfig::default();

        let resilience = ResilienceConfig {
            cache: CacheConfig {
                ttl: Duration::from_secs(env.parse("CACHE_TTL_SECS", 900)?),
                max_entries: env.parse("CACHE_MAX_ENTRIES", defaults.cache.max_entries)?,
            },
            rate_limit_max_requests: env.parse("RATE_LIMIT_MAX_REQUESTS", 20)?,
            rate_limit_window: Duration::from_secs(env.parse("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max_wait: Duration::from_secs(env.parse("RATE_LIMIT_MAX_WAIT_SECS", 5)?),
            breaker_failure_threshold: env.parse("BREAKER_FAILURE_THRESHOLD", 3)?,
            breaker_recovery_timeout: Duration::from_secs(env.parse("BREAKER_RECOVERY_SECS", 120)?),
            retry: RetryPolicy {
                max_attempts: env.parse("RETRY_MAX_ATTEMPTS", 3)?,
                base_delay: Duration::from_millis(env.parse("RETRY_BASE_DELAY_MS", 1000)?),
                max_delay: Duration::from_millis(env.parse("RETRY_MAX_DELAY_MS", 30_000)?),
                jitter_factor: env.parse("RETRY_JITTER", 0.0)?,
                ..defaults.retry
            },
            fetch_deadline: Duration::from_secs(env.parse("FETCH_DEADLINE_SECS", 30)?),
        };
        resilience.validate()?;

        let ebay = match (env.get("EBAY_APP_ID"), env.get("EBAY_CERT_ID")) {
            (Some(app_id), Some(cert_id)) => Some(EbayCredentials {
                app_id,
                cert_id,
                sandbox: env.parse("EBAY_SANDBOX", false)?,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: env.parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8001)))?,
            log_level: env.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            http_timeout: Duration::from_secs(env.parse("HTTP_TIMEOUT_SECS", 15)?),
            resilience,
            ebay,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    // Blank values count as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}
