//! Per-host admission control over a fixed, global window.
//!
//! All hosts share one window clock. When the window elapses the whole
//! table is cleared, so a reset observed through one host hands every host
//! a fresh allotment. This is a fixed-window limiter, not a sliding one.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Request counts seen in the current window.
#[derive(Debug)]
struct RateWindow {
    counts: HashMap<IpAddr, u32>,
    window_start: Instant,
}

/// Thread-safe fixed-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    fn starting_at(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            limit: config.requests_per_window,
            window: config.window,
            state: Mutex::new(RateWindow {
                counts: HashMap::new(),
                window_start: now,
            }),
        }
    }

    /// Count a request from `host` and decide whether to serve it.
    pub fn admit(&self, host: IpAddr) -> bool {
        self.admit_at(host, Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, host: IpAddr, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(state.window_start) >= self.window {
            trace!(hosts = state.counts.len(), "Rate window elapsed, clearing");
            state.counts.clear();
            state.window_start = now;
        }

        let count = state.counts.entry(host).or_insert(0);
        *count += 1;
        let admitted = *count <= self.limit;
        if !admitted {
            debug!(%host, count = *count, limit = self.limit, "Rate limit exceeded");
        }
        admitted
    }

    /// Number of hosts seen in the current window.
    pub fn tracked_hosts(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .len()
    }
}
