use std::{collections::BTreeMap, time::Duration};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    // Only set while Open: time left before a probe is let through
    pub retry_in_secs: Option<u64>,
}

// Failure gate for one remote dependency.
// Open -> HalfOpen is evaluated lazily by allow_call, there is no timer.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }

    pub fn allow_call(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.recovery_elapsed(Instant::now()) {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.failure_threshold {
                    self.trip();
                }
            }
            CircuitState::HalfOpen => self.trip(),
            // Late failures from calls admitted before the trip don't push recovery back
            CircuitState::Open => {}
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let retry_in_secs = match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                (opened_at + self.recovery_timeout)
                    .saturating_duration_since(Instant::now())
                    .as_secs(),
            ),
            _ => None,
        };

        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            retry_in_secs,
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
    }

    fn recovery_elapsed(&self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened_at) => now.saturating_duration_since(opened_at) >= self.recovery_timeout,
            None => true,
        }
    }
}

// One breaker per dependency id, created on first use.
// Every operation goes through the DashMap entry for that id, which holds the
// shard's write lock, so outcomes for the same dependency are serialized and
// concurrent failures can't race past the threshold check.
#[derive(Debug)]
pub struct CircuitBreakers {
    failure_threshold: u32,
    recovery_timeout: Duration,
    breakers: DashMap<String, CircuitBreaker>,
}

impl CircuitBreakers {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            breakers: DashMap::new(),
        }
    }

    pub fn allow_call(&self, dependency_id: &str) -> bool {
        let mut breaker = self.breaker(dependency_id);
        let before = breaker.state();
        let allowed = breaker.allow_call();
        if before == CircuitState::Open && breaker.state() == CircuitState::HalfOpen {
            tracing::info!(dependency = dependency_id, "circuit half-open, probing dependency");
        }
        allowed
    }

    pub fn record_success(&self, dependency_id: &str) {
        let mut breaker = self.breaker(dependency_id);
        if breaker.state() != CircuitState::Closed {
            tracing::info!(dependency = dependency_id, "circuit closed, dependency recovered");
        }
        breaker.record_success();
    }

    pub fn record_failure(&self, dependency_id: &str) {
        let mut breaker = self.breaker(dependency_id);
        let before = breaker.state();
        breaker.record_failure();
        if before != CircuitState::Open && breaker.state() == CircuitState::Open {
            tracing::warn!(
                dependency = dependency_id,
                failures = breaker.consecutive_failures(),
                recovery_secs = self.recovery_timeout.as_secs(),
                "circuit opened"
            );
        }
    }

    pub fn snapshot(&self, dependency_id: &str) -> Option<CircuitSnapshot> {
        self.breakers.get(dependency_id).map(|b| b.snapshot())
    }

    pub fn snapshots(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    // Emergency reset, returns how many breakers were not closed
    pub fn reset_all(&self) -> usize {
        let mut reset = 0;
        for mut entry in self.breakers.iter_mut() {
            if !entry.is_closed() {
                reset += 1;
            }
            entry.record_success();
        }
        reset
    }

    fn breaker(&self, dependency_id: &str) -> dashmap::mapref::one::RefMut<'_, String, CircuitBreaker> {
        self.breakers
            .entry(dependency_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.recovery_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_then_half_opens() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(120));

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_call());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_call());

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(breaker.allow_call());
        breaker.record_success();
        assert!(breaker.is_closed());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_reopens_with_fresh_timer() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.allow_call());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // The timer restarted at the probe failure
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!breaker.allow_call());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow_call());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(120));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_closed());
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_extend_open_period() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;
        breaker.record_failure();
        assert_eq!(breaker.snapshot().retry_in_secs, Some(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.allow_call());
    }

    #[test]
    fn test_registry_isolates_dependencies() {
        let breakers = CircuitBreakers::new(2, Duration::from_secs(120));
        breakers.record_failure("vinted");
        breakers.record_failure("vinted");

        assert!(!breakers.allow_call("vinted"));
        assert!(breakers.allow_call("ebay"));

        let snapshots = breakers.snapshots();
        assert_eq!(snapshots["vinted"].state, CircuitState::Open);
        assert_eq!(snapshots["ebay"].state, CircuitState::Closed);
        assert_eq!(breakers.snapshot("vestiaire"), None);

        assert_eq!(breakers.reset_all(), 1);
        assert!(breakers.allow_call("vinted"));
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let breakers = Arc::new(CircuitBreakers::new(1000, Duration::from_secs(120)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breakers = breakers.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        breakers.record_failure("vestiaire");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = breakers.snapshot("vestiaire").unwrap();
        assert_eq!(snapshot.consecutive_failures, 800);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }
}
