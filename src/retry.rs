// Bounded retry with exponential backoff around a single outbound call

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::error::{FetchError, ResilienceError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FetchError),
}

// One iteration of the retry loop, only lives as long as the call that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttempt {
    pub attempt_number: u32,
    pub delay_before: Duration,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryError {
    Exhausted { attempts: Vec<FetchAttempt> },
    NonRetryable { attempts: Vec<FetchAttempt> },
    DeadlineExceeded { attempts: Vec<FetchAttempt> },
}

impl RetryError {
    pub fn attempts(&self) -> &[FetchAttempt] {
        match self {
            RetryError::Exhausted { attempts }
            | RetryError::NonRetryable { attempts }
            | RetryError::DeadlineExceeded { attempts } => attempts,
        }
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.attempts()
            .iter()
            .rev()
            .find_map(|attempt| match &attempt.outcome {
                AttemptOutcome::Failed(err) => Some(err),
                AttemptOutcome::Succeeded => None,
            })
    }
}

impl From<RetryError> for ResilienceError {
    fn from(err: RetryError) -> Self {
        let attempts = err.attempts().len() as u32;
        let last_error = err.last_error().cloned();
        match (err, last_error) {
            (RetryError::NonRetryable { .. }, Some(source)) => ResilienceError::NonRetryable { source },
            (RetryError::Exhausted { .. }, Some(last_error)) => ResilienceError::RetryExhausted {
                attempts,
                last_error,
            },
            (_, last_error) => ResilienceError::DeadlineExceeded {
                attempts,
                last_error,
            },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    // Delay after the n-th failed attempt (0-based): base * multiplier^n, capped at max_delay
    pub fn backoff_delay(&self, retry_attempt: u32) -> Duration {
        let base_backoff_ms = (self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(retry_attempt as i32))
        .min(self.max_delay.as_millis() as f64);

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(base_backoff_ms as u64);
        }

        // Spread retries so clients that failed together don't come back together
        let jitter = rand::random::<f64>() * self.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - self.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms as u64)
    }

    // Runs `fetch_fn` until it succeeds, fails with a non-retryable error, or
    // `max_attempts` calls have failed.
    // A `Retry-After` hint carried by `FetchError::RateLimited` replaces the
    // computed backoff (still capped at `max_delay`). When a `deadline` is
    // given, an in-flight call is abandoned at the deadline and no sleep is
    // started that would end past it.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        mut fetch_fn: F,
        deadline: Option<Instant>,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = Vec::with_capacity(max_attempts as usize);
        let mut delay_before = Duration::ZERO;

        for attempt_number in 1..=max_attempts {
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fetch_fn()).await {
                    Ok(result) => result,
                    Err(_) => {
                        attempts.push(FetchAttempt {
                            attempt_number,
                            delay_before,
                            outcome: AttemptOutcome::Failed(FetchError::Timeout),
                        });
                        tracing::warn!(attempt = attempt_number, "deadline hit during fetch");
                        return Err(RetryError::DeadlineExceeded { attempts });
                    }
                },
                None => fetch_fn().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = err.is_retryable();
            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.backoff_delay(attempt_number - 1))
                .min(self.max_delay);

            attempts.push(FetchAttempt {
                attempt_number,
                delay_before,
                outcome: AttemptOutcome::Failed(err.clone()),
            });

            if !retryable {
                tracing::debug!(attempt = attempt_number, error = %err, "non-retryable fetch error");
                return Err(RetryError::NonRetryable { attempts });
            }
            if attempt_number == max_attempts {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    tracing::warn!(
                        attempt = attempt_number,
                        delay_ms = delay.as_millis() as u64,
                        "backoff would overrun deadline, giving up"
                    );
                    return Err(RetryError::DeadlineExceeded { attempts });
                }
            }

            tracing::warn!(
                attempt = attempt_number,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient fetch error, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            delay_before = delay;
        }

        Err(RetryError::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn counting_fetch(
        calls: Arc<AtomicU32>,
        fail_times: u32,
        error: FetchError,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, FetchError>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < fail_times {
                std::future::ready(Err(error.clone()))
            } else {
                std::future::ready(Ok("listings"))
            }
        }
    }

    #[test]
    fn test_backoff_schedule_is_exponential_and_monotonic() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..3).map(|n| policy.backoff_delay(n)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..Default::default()
        };
        for _ in 0..100 {
            let delay = policy.backoff_delay(1).as_millis();
            assert!((1800..=2200).contains(&delay), "delay out of range: {delay}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result = policy
            .execute_with_retry(
                counting_fetch(calls.clone(), 2, FetchError::Http { status: 503 }),
                None,
            )
            .await;

        assert_eq!(assert_ok!(result), "listings");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_carries_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let err = assert_err!(
            policy
                .execute_with_retry(
                    counting_fetch(calls.clone(), u32::MAX, FetchError::Network("reset".into())),
                    None,
                )
                .await
        );

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RetryError::Exhausted { .. }));
        assert_eq!(err.last_error(), Some(&FetchError::Network("reset".into())));
        let delays: Vec<_> = err.attempts().iter().map(|a| a.delay_before).collect();
        assert_eq!(
            delays,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let err = assert_err!(
            policy
                .execute_with_retry(
                    counting_fetch(calls.clone(), u32::MAX, FetchError::Http { status: 404 }),
                    None,
                )
                .await
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::NonRetryable { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_takes_precedence() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result = policy
            .execute_with_retry(
                counting_fetch(
                    calls.clone(),
                    1,
                    FetchError::RateLimited {
                        retry_after: Some(Duration::from_secs(7)),
                    },
                ),
                None,
            )
            .await;

        assert_ok!(result);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_before_oversized_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(2500);

        let err = assert_err!(
            policy
                .execute_with_retry(
                    counting_fetch(calls.clone(), u32::MAX, FetchError::Http { status: 502 }),
                    Some(deadline),
                )
                .await
        );

        // 1st fails at t=0, sleeps 1s; 2nd fails at t=1, a 2s sleep would end past 2.5s
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, RetryError::DeadlineExceeded { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_in_flight_call() {
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let err = assert_err!(
            policy
                .execute_with_retry(
                    || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok::<_, FetchError>(())
                    },
                    Some(start + Duration::from_secs(2)),
                )
                .await
        );

        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(err.last_error(), Some(&FetchError::Timeout));
        let resilience: ResilienceError = err.into();
        assert!(matches!(
            resilience,
            ResilienceError::DeadlineExceeded { attempts: 1, .. }
        ));
    }
}
