// Per-client sliding-window rate limiter
// Each client keeps the instants of its recent admissions; anything older than the window stops counting

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

pub const DEFAULT_CLIENT_ID: &str = "default";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RateLimiterStatus {
    pub max_requests: usize,
    pub window_secs: u64,
    pub tracked_clients: usize,
    pub admitted: usize,
    pub rejected: usize,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    // DashMap hands out the shard write lock for get_mut/entry, which keeps
    // prune-then-append atomic per client
    windows: DashMap<String, VecDeque<Instant>>,
    admitted: AtomicUsize,
    rejected: AtomicUsize,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
            admitted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_allowed(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut timestamps = self.windows.entry(client_id.to_string()).or_default();
        Self::prune(&mut timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            self.admitted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                client_id,
                limit = self.max_requests,
                window_secs = self.window.as_secs(),
                "rate limit exceeded"
            );
            false
        }
    }

    // Time until the oldest admission in the window stops counting
    pub fn wait_time(&self, client_id: &str) -> Duration {
        let now = Instant::now();
        match self.windows.get(client_id) {
            Some(timestamps) => timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    // Forget every client window, returns how many clients were tracked
    pub fn reset(&self) -> usize {
        let clients = self.windows.len();
        self.windows.clear();
        clients
    }

    pub fn status(&self) -> RateLimiterStatus {
        let now = Instant::now();
        // Idle clients would otherwise accumulate forever
        self.windows.retain(|_, timestamps| {
            Self::prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });

        RateLimiterStatus {
            max_requests: self.max_requests,
            window_secs: self.window.as_secs(),
            tracked_clients: self.windows.len(),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
