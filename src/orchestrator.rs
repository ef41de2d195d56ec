// Composes cache, rate limiter, circuit breakers and retry around one outbound fetch.
// Every call resolves to a value: a cached result, a fresh result, or the
// caller's fallback tagged with the `ResilienceError` that forced it.

use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    cache::TtlCache,
    circuit_breaker::CircuitBreakers,
    config::ResilienceConfig,
    error::{FetchError, ResilienceError},
    health::{FetchCounters, HealthSnapshot},
    rate_limiter::RateLimiter,
    retry::RetryPolicy,
};

// What to do when the rate limiter turns a client away
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Reject,
    Wait { max_wait: Duration },
}

#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub cache_key: &'a str,
    pub client_id: &'a str,
    pub dependency_id: &'a str,
    pub admission: Admission,
    // Budget for the whole call including retries; None uses the configured default
    pub deadline: Option<Duration>,
}

impl<'a> FetchRequest<'a> {
    pub fn new(cache_key: &'a str, client_id: &'a str, dependency_id: &'a str) -> Self {
        Self {
            cache_key,
            client_id,
            dependency_id,
            admission: Admission::Reject,
            deadline: None,
        }
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeSource {
    Cached,
    Fresh,
    Degraded(ResilienceError),
}

#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub value: T,
    pub source: OutcomeSource,
}

impl<T> FetchOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, OutcomeSource::Degraded(_))
    }

    pub fn degradation(&self) -> Option<&ResilienceError> {
        match &self.source {
            OutcomeSource::Degraded(reason) => Some(reason),
            _ => None,
        }
    }

    // Non-fatal warning for the response body; None when the data is real
    pub fn warning(&self) -> Option<String> {
        self.degradation().map(|reason| match reason {
            ResilienceError::DependencyUnavailable { .. } => {
                format!("{reason}; temporarily degraded, serving fallback data")
            }
            _ => format!("{reason}; serving fallback data"),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ClearReport {
    pub entries_removed: usize,
    pub clients_reset: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicUsize,
    cache_hits: AtomicUsize,
    fresh: AtomicUsize,
    degraded: AtomicUsize,
}

// Resilience layer shared by all request handlers.
// Built once at startup and passed around behind an `Arc`; all interior state
// is synchronized, so `fetch` takes `&self`.
#[derive(Debug)]
pub struct ResilientFetcher<T> {
    cache: TtlCache<T>,
    rate_limiter: RateLimiter,
    breakers: CircuitBreakers,
    retry: RetryPolicy,
    default_deadline: Duration,
    started_at: Instant,
    counters: Counters,
}

impl<T: Clone> ResilientFetcher<T> {
    pub fn new(config: ResilienceConfig) -> Self {
        Self::from_parts(
            TtlCache::new(config.cache),
            RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window),
            CircuitBreakers::new(
                config.breaker_failure_threshold,
                config.breaker_recovery_timeout,
            ),
            config.retry,
            config.fetch_deadline,
        )
    }

    pub fn from_parts(
        cache: TtlCache<T>,
        rate_limiter: RateLimiter,
        breakers: CircuitBreakers,
        retry: RetryPolicy,
        default_deadline: Duration,
    ) -> Self {
        Self {
            cache,
            rate_limiter,
            breakers,
            retry,
            default_deadline,
            started_at: Instant::now(),
            counters: Counters::default(),
        }
    }

    pub fn cache(&self) -> &TtlCache<T> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    // Cache, then rate limiter, then circuit breaker, then the retried fetch.
    // Only a fresh result is cached and only dependency faults are reported to
    // the breaker (once per call, not once per attempt). `fallback_fn` runs on
    // every other path.
    pub async fn fetch<F, Fut, FB>(
        &self,
        request: &FetchRequest<'_>,
        fetch_fn: F,
        fallback_fn: FB,
    ) -> FetchOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        FB: FnOnce() -> T,
    {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.cache.get(request.cache_key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return FetchOutcome {
                value,
                source: OutcomeSource::Cached,
            };
        }

        let deadline = Instant::now() + request.deadline.unwrap_or(self.default_deadline);

        if let Err(reason) = self.admit(request, deadline).await {
            return self.degrade(request, reason, fallback_fn);
        }

        if !self.breakers.allow_call(request.dependency_id) {
            let reason = ResilienceError::DependencyUnavailable {
                dependency: request.dependency_id.to_string(),
            };
            return self.degrade(request, reason, fallback_fn);
        }

        match self.retry.execute_with_retry(fetch_fn, Some(deadline)).await {
            Ok(value) => {
                self.breakers.record_success(request.dependency_id);
                self.cache.set(request.cache_key, value.clone());
                self.counters.fresh.fetch_add(1, Ordering::Relaxed);
                FetchOutcome {
                    value,
                    source: OutcomeSource::Fresh,
                }
            }
            Err(err) => {
                let reason = ResilienceError::from(err);
                if reason.is_dependency_fault() {
                    self.breakers.record_failure(request.dependency_id);
                } else {
                    tracing::debug!(
                        dependency = request.dependency_id,
                        reason = %reason,
                        "request rejected by dependency, circuit unaffected"
                    );
                }
                self.degrade(request, reason, fallback_fn)
            }
        }
    }

    // Admin reset: drop every cached result and every client's rate window
    pub fn clear(&self) -> ClearReport {
        let report = ClearReport {
            entries_removed: self.cache.clear(),
            clients_reset: self.rate_limiter.reset(),
        };
        tracing::info!(
            entries_removed = report.entries_removed,
            clients_reset = report.clients_reset,
            "cache cleared"
        );
        report
    }

    pub fn health(&self) -> HealthSnapshot {
        let circuits = self.breakers.snapshots();
        HealthSnapshot {
            status: HealthSnapshot::status_for(&circuits),
            uptime_secs: self.started_at.elapsed().as_secs(),
            generated_at: Utc::now(),
            cache: self.cache.stats().into(),
            circuits,
            rate_limiter: self.rate_limiter.status(),
            fetches: FetchCounters {
                total: self.counters.total.load(Ordering::Relaxed),
                cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
                fresh: self.counters.fresh.load(Ordering::Relaxed),
                degraded: self.counters.degraded.load(Ordering::Relaxed),
            },
        }
    }

    async fn admit(
        &self,
        request: &FetchRequest<'_>,
        deadline: Instant,
    ) -> Result<(), ResilienceError> {
        let max_wait = match request.admission {
            Admission::Reject => Duration::ZERO,
            Admission::Wait { max_wait } => max_wait,
        };
        let wait_until = (Instant::now() + max_wait).min(deadline);

        loop {
            if self.rate_limiter.is_allowed(request.client_id) {
                return Ok(());
            }

            let wait_time = self.rate_limiter.wait_time(request.client_id);
            if Instant::now() + wait_time > wait_until {
                return Err(ResilienceError::RateLimitExceeded { wait_time });
            }
            tokio::time::sleep(wait_time).await;
        }
    }

    fn degrade<FB>(
        &self,
        request: &FetchRequest<'_>,
        reason: ResilienceError,
        fallback_fn: FB,
    ) -> FetchOutcome<T>
    where
        FB: FnOnce() -> T,
    {
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            dependency = request.dependency_id,
            client_id = request.client_id,
            reason = %reason,
            "serving fallback data"
        );
        FetchOutcome {
            value: fallback_fn(),
            source: OutcomeSource::Degraded(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::CacheConfig, circuit_breaker::CircuitState, health::HealthStatus};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fetcher(max_requests: usize, failure_threshold: u32) -> ResilientFetcher<Vec<String>> {
        ResilientFetcher::new(ResilienceConfig {
            cache: CacheConfig {
                ttl: Duration::from_secs(300),
                max_entries: 100,
            },
            rate_limit_max_requests: max_requests,
            rate_limit_window: Duration::from_secs(60),
            breaker_failure_threshold: failure_threshold,
            breaker_recovery_timeout: Duration::from_secs(120),
            ..Default::default()
        })
    }

    fn sample() -> Vec<String> {
        vec!["sample_item".to_string()]
    }

    async fn ok_fetch(calls: Arc<AtomicU32>) -> Result<Vec<String>, FetchError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["live_item".to_string()])
    }

    async fn failing_fetch(calls: Arc<AtomicU32>) -> Result<Vec<String>, FetchError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Http { status: 503 })
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_fetch_resolves_to_fallback() {
        let fetcher = fetcher(20, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let request = FetchRequest::new("vinted:dress", "10.0.0.1", "vinted");

        let outcome = fetcher
            .fetch(&request, || failing_fetch(calls.clone()), sample)
            .await;

        assert_eq!(outcome.value, sample());
        assert!(matches!(
            outcome.degradation(),
            Some(ResilienceError::RetryExhausted { attempts: 3, .. })
        ));
        assert!(outcome.warning().unwrap().contains("fallback"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // One failure per exhausted call, not per attempt
        let circuit = fetcher.breakers().snapshot("vinted").unwrap();
        assert_eq!(circuit.consecutive_failures, 1);
        assert_eq!(circuit.state, CircuitState::Closed);

        // Fallback data is never cached
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_requests_from_one_client_do_not_open_circuit() {
        let fetcher = fetcher(20, 3);
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..5 {
            let key = format!("ebay:bad{i}");
            let request = FetchRequest::new(&key, "10.0.0.66", "ebay");
            let outcome = fetcher
                .fetch(
                    &request,
                    || async { Err::<Vec<String>, _>(FetchError::Http { status: 400 }) },
                    sample,
                )
                .await;
            assert!(matches!(
                outcome.degradation(),
                Some(ResilienceError::NonRetryable { .. })
            ));
        }

        let circuit = fetcher.breakers().snapshot("ebay").unwrap();
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures, 0);

        let other = FetchRequest::new("ebay:iphone", "10.0.0.7", "ebay");
        let outcome = fetcher.fetch(&other, || ok_fetch(calls.clone()), sample).await;
        assert_eq!(outcome.source, OutcomeSource::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failures_still_count_against_dependency() {
        let fetcher = fetcher(20, 2);

        for i in 0..2 {
            let key = format!("ebay:q{i}");
            let request = FetchRequest::new(&key, "c", "ebay");
            fetcher
                .fetch(
                    &request,
                    || async { Err::<Vec<String>, _>(FetchError::Http { status: 401 }) },
                    sample,
                )
                .await;
        }

        assert_eq!(
            fetcher.breakers().snapshot("ebay").unwrap().state,
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_fetch() {
        let fetcher = fetcher(20, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let request = FetchRequest::new("ebay:iphone", "10.0.0.1", "ebay");

        let first = fetcher.fetch(&request, || ok_fetch(calls.clone()), sample).await;
        let second = fetcher.fetch(&request, || ok_fetch(calls.clone()), sample).await;

        assert_eq!(first.source, OutcomeSource::Fresh);
        assert_eq!(second.source, OutcomeSource::Cached);
        assert_eq!(first.value, second.value);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A cache hit doesn't count against the client's rate window
        assert_eq!(fetcher.rate_limiter().status().admitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_admission_returns_rate_limited_fallback() {
        let fetcher = fetcher(1, 3);
        let calls = Arc::new(AtomicU32::new(0));

        let first = FetchRequest::new("vinted:a", "client1", "vinted");
        fetcher.fetch(&first, || ok_fetch(calls.clone()), sample).await;

        let second = FetchRequest::new("vinted:b", "client1", "vinted");
        let outcome = fetcher.fetch(&second, || ok_fetch(calls.clone()), sample).await;

        assert_eq!(outcome.value, sample());
        assert_eq!(
            outcome.degradation(),
            Some(&ResilienceError::RateLimitExceeded {
                wait_time: Duration::from_secs(60)
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Local rejections never touch the breaker
        assert_eq!(
            fetcher.breakers().snapshot("vinted").unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_admission_blocks_until_window_frees() {
        let fetcher = fetcher(1, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let admission = Admission::Wait {
            max_wait: Duration::from_secs(90),
        };

        let first = FetchRequest::new("vinted:a", "client1", "vinted").with_admission(admission);
        fetcher.fetch(&first, || ok_fetch(calls.clone()), sample).await;

        let start = Instant::now();
        let second = FetchRequest::new("vinted:b", "client1", "vinted")
            .with_admission(admission)
            .with_deadline(Duration::from_secs(120));
        let outcome = fetcher.fetch(&second, || ok_fetch(calls.clone()), sample).await;

        assert_eq!(outcome.source, OutcomeSource::Fresh);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_admission_is_bounded() {
        let fetcher = fetcher(1, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let admission = Admission::Wait {
            max_wait: Duration::from_secs(5),
        };

        let first = FetchRequest::new("k1", "client1", "vinted").with_admission(admission);
        fetcher.fetch(&first, || ok_fetch(calls.clone()), sample).await;

        let start = Instant::now();
        let second = FetchRequest::new("k2", "client1", "vinted").with_admission(admission);
        let outcome = fetcher.fetch(&second, || ok_fetch(calls.clone()), sample).await;

        assert!(matches!(
            outcome.degradation(),
            Some(ResilienceError::RateLimitExceeded { .. })
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_then_recovers() {
        let fetcher = fetcher(100, 1);
        let calls = Arc::new(AtomicU32::new(0));

        let failing = FetchRequest::new("vestiaire:chanel", "c", "vestiaire");
        fetcher.fetch(&failing, || failing_fetch(calls.clone()), sample).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let outcome = fetcher.fetch(&failing, || ok_fetch(calls.clone()), sample).await;
        assert_eq!(
            outcome.degradation(),
            Some(&ResilienceError::DependencyUnavailable {
                dependency: "vestiaire".to_string()
            })
        );
        assert!(outcome.warning().unwrap().contains("temporarily degraded"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetcher.health().status, HealthStatus::Degraded);

        // Other dependencies are unaffected
        let other = FetchRequest::new("ebay:chanel", "c", "ebay");
        let outcome = fetcher.fetch(&other, || ok_fetch(calls.clone()), sample).await;
        assert_eq!(outcome.source, OutcomeSource::Fresh);

        tokio::time::advance(Duration::from_secs(121)).await;
        let outcome = fetcher.fetch(&failing, || ok_fetch(calls.clone()), sample).await;
        assert_eq!(outcome.source, OutcomeSource::Fresh);
        assert_eq!(
            fetcher.breakers().snapshot("vestiaire").unwrap().state,
            CircuitState::Closed
        );
        assert_eq!(fetcher.health().status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_whole_fetch() {
        let fetcher = fetcher(20, 3);
        let request = FetchRequest::new("slow", "c", "vinted").with_deadline(Duration::from_secs(2));
        let start = Instant::now();

        let outcome = fetcher
            .fetch(
                &request,
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(vec!["too_late".to_string()])
                },
                sample,
            )
            .await;

        assert_eq!(outcome.value, sample());
        assert!(matches!(
            outcome.degradation(),
            Some(ResilienceError::DeadlineExceeded { .. })
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_and_clear() {
        let fetcher = fetcher(20, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let request = FetchRequest::new("vinted:dress", "c", "vinted");

        fetcher.fetch(&request, || ok_fetch(calls.clone()), sample).await;
        fetcher.fetch(&request, || ok_fetch(calls.clone()), sample).await;

        let health = fetcher.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.cache.cached_item_count, 1);
        assert_eq!(health.cache.hit_rate, 0.5);
        assert_eq!(health.fetches.total, 2);
        assert_eq!(health.fetches.cache_hits, 1);
        assert_eq!(health.rate_limiter.tracked_clients, 1);

        let report = fetcher.clear();
        assert_eq!(
            report,
            ClearReport {
                entries_removed: 1,
                clients_reset: 1
            }
        );

        fetcher.fetch(&request, || ok_fetch(calls.clone()), sample).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
