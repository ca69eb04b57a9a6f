//! Sliding-window call throttling per principal.
//!
//! The limiter only computes an advisory lag; it never sleeps. Callers decide
//! whether to delay, reject or ignore it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::ids::PrincipalId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub burst_window_ms: u64,
    pub burst_threshold: usize,
    pub burst_lag_ms: u64,
    pub sustained_window_ms: u64,
    pub sustained_threshold: usize,
    pub sustained_lag_ms: u64,
    /// Trusted callers are never throttled.
    pub exempt_trusted: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_window_ms: 1_000,
            burst_threshold: 5,
            burst_lag_ms: 1_000,
            sustained_window_ms: 10_000,
            sustained_threshold: 10,
            sustained_lag_ms: 10_000,
            exempt_trusted: false,
        }
    }
}

impl RateLimitConfig {
    fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    fn sustained_window(&self) -> Duration {
        Duration::from_millis(self.sustained_window_ms)
    }

    /// Windows are pruned to the longer of the two.
    fn retention(&self) -> Duration {
        self.burst_window().max(self.sustained_window())
    }
}

/// Call timestamps of one principal, oldest first.
#[derive(Debug, Default)]
struct RateWindow {
    calls: VecDeque<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, retention: Duration) {
        while let Some(front) = self.calls.front() {
            if now.saturating_duration_since(*front) >= retention {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.calls
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < window)
            .count()
    }

    fn observe(&mut self, now: Instant, config: &RateLimitConfig) -> Duration {
        // A caller that sampled its clock before a racing one lands at the
        // newest timestamp so `calls` stays sorted.
        let now = self.calls.back().map_or(now, |last| now.max(*last));
        self.calls.push_back(now);
        self.prune(now, config.retention());

        let sustained = self.count_within(now, config.sustained_window());
        let burst = self.count_within(now, config.burst_window());

        // Larger lag wins when both thresholds are crossed.
        let mut lag = Duration::ZERO;
        if config.sustained_threshold > 0 && sustained >= config.sustained_threshold {
            lag = lag.max(Duration::from_millis(config.sustained_lag_ms));
        }
        if config.burst_threshold > 0 && burst >= config.burst_threshold {
            lag = lag.max(Duration::from_millis(config.burst_lag_ms));
        }
        lag
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<PrincipalId, Arc<Mutex<RateWindow>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record a call at `now` and return the lag to impose on it.
    pub fn observe_call(&self, principal: PrincipalId, now: Instant) -> Duration {
        let window = self.window(principal);
        let lag = lock_recover(&window).observe(now, &self.config);
        if !lag.is_zero() {
            tracing::debug!(principal = %principal, lag_ms = lag.as_millis() as u64, "Rate limit lag imposed");
        }
        lag
    }

    /// Like [`observe_call`](Self::observe_call) for a trusted caller.
    pub fn observe_trusted_call(&self, principal: PrincipalId, now: Instant) -> Duration {
        if self.config.exempt_trusted {
            return Duration::ZERO;
        }
        self.observe_call(principal, now)
    }

    /// Drop windows with no calls inside the retention period. Returns the
    /// number of principals evicted.
    pub fn prune_idle(&self, now: Instant) -> usize {
        let retention = self.config.retention();
        let mut windows = lock_recover(&self.windows);
        let before = windows.len();
        windows.retain(|_, window| {
            let mut window = lock_recover(window);
            window.prune(now, retention);
            !window.calls.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_principals(&self) -> usize {
        lock_recover(&self.windows).len()
    }

    /// The map lock is held only long enough to fetch or create the handle.
    fn window(&self, principal: PrincipalId) -> Arc<Mutex<RateWindow>> {
        let mut windows = lock_recover(&self.windows);
        Arc::clone(windows.entry(principal).or_default())
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
