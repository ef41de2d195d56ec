// Read-only view of the resilience layer's counters, served by the health endpoint

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    cache::CacheStats,
    circuit_breaker::{CircuitSnapshot, CircuitState},
    rate_limiter::RateLimiterStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheHealth {
    pub hit_rate: f64,
    pub cached_item_count: usize,
    pub hits: usize,
    pub misses: usize,
    pub expired: usize,
    pub evictions: usize,
}

impl From<CacheStats> for CacheHealth {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            cached_item_count: stats.items_count,
            hits: stats.hit_count,
            misses: stats.miss_count,
            expired: stats.expired_count,
            evictions: stats.eviction_count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FetchCounters {
    pub total: usize,
    pub cache_hits: usize,
    pub fresh: usize,
    pub degraded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub generated_at: DateTime<Utc>,
    pub cache: CacheHealth,
    pub circuits: BTreeMap<String, CircuitSnapshot>,
    pub rate_limiter: RateLimiterStatus,
    pub fetches: FetchCounters,
}

impl HealthSnapshot {
    // Any dependency that isn't fully closed means some responses are fallbacks
    pub fn status_for(circuits: &BTreeMap<String, CircuitSnapshot>) -> HealthStatus {
        if circuits.values().all(|c| c.state == CircuitState::Closed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}
