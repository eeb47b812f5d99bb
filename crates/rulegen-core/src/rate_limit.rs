//! Global rate limiting for outbound generation calls.
//!
//! A single [`RateLimiter`] is shared by every worker. It holds a budget of
//! `calls` tokens per `period`. Each spent token is replenished exactly one
//! `period` after it was spent, so over any window of length `period` at most
//! `calls` grants are handed out. Workers that find the bucket empty wait for
//! the next replenishment instead of failing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Longest single sleep while waiting for a grant to expire.
///
/// Grants whose expiry lies beyond what `Instant` can represent are re-checked
/// after this interval instead of computing an overflowing deadline.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(86_400);

/// Upper bound on the grant queue preallocation.
const MAX_PREALLOCATED_GRANTS: u32 = 4096;

/// Budget of `calls` per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of calls per window.
    pub calls: u32,
    /// Window length.
    pub period: Duration,
}

impl RateLimitConfig {
    /// Create a budget of `calls` per `period`.
    #[must_use]
    pub const fn new(calls: u32, period: Duration) -> Self {
        Self { calls, period }
    }

    /// Budget of `calls` per second.
    #[must_use]
    pub const fn per_second(calls: u32) -> Self {
        Self::new(calls, Duration::from_secs(1))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(2000, Duration::from_secs(60))
    }
}

/// Snapshot of limiter activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Tokens handed out.
    pub grants: u64,
    /// Grants that had to wait for a replenishment.
    pub waits: u64,
    /// Cumulative time callers spent waiting.
    pub total_wait: Duration,
}

/// Windowed token bucket shared across all workers.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// Grant instants within the current window, oldest first.
    grants: Mutex<VecDeque<Instant>>,
    granted: AtomicU64,
    waited: AtomicU64,
    wait_micros: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    ///
    /// A budget of zero calls is treated as one call per period.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let config = RateLimitConfig {
            calls: config.calls.max(1),
            period: config.period,
        };
        Self {
            config,
            grants: Mutex::new(VecDeque::with_capacity(
                config.calls.min(MAX_PREALLOCATED_GRANTS) as usize,
            )),
            granted: AtomicU64::new(0),
            waited: AtomicU64::new(0),
            wait_micros: AtomicU64::new(0),
        }
    }

    /// The effective budget.
    #[must_use]
    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait until a call unit is available and take it.
    ///
    /// Returns how long the caller waited.
    ///
    /// # Cancel Safety
    ///
    /// The lock is never held across an await point; a token is only recorded
    /// once it has actually been granted.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        let mut slept = false;

        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                while grants
                    .front()
                    .is_some_and(|granted| now.duration_since(*granted) >= self.config.period)
                {
                    grants.pop_front();
                }

                if grants.len() < self.config.calls as usize {
                    grants.push_back(now);
                    None
                } else {
                    grants.front().map(|oldest| {
                        oldest
                            .checked_add(self.config.period)
                            .map_or(MAX_WAIT_SLICE, |ready| {
                                ready.saturating_duration_since(now).min(MAX_WAIT_SLICE)
                            })
                    })
                }
            };

            match wait {
                None => break,
                Some(wait) => {
                    trace!(wait_ms = wait.as_millis() as u64, "rate limit bucket empty");
                    tokio::time::sleep(wait).await;
                    slept = true;
                },
            }
        }

        self.granted.fetch_add(1, Ordering::Relaxed);
        if !slept {
            return Duration::ZERO;
        }

        let waited = started.elapsed();
        self.waited.fetch_add(1, Ordering::Relaxed);
        self.wait_micros.fetch_add(
            u64::try_from(waited.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        debug!(waited_ms = waited.as_millis() as u64, "rate limit token granted after wait");
        waited
    }

    /// Activity counters since creation.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            grants: self.granted.load(Ordering::Relaxed),
            waits: self.waited.load(Ordering::Relaxed),
            total_wait: Duration::from_micros(self.wait_micros.load(Ordering::Relaxed)),
        }
    }
}
