//! Bounded retry with exponential backoff.
//!
//! [`run_with_retry`] drives one generation operation to success, to a fatal
//! failure, or to exhaustion of `max_attempts`. Which failures are worth
//! retrying is decided by a [`Classifier`]; [`StatusClassifier`] is the
//! configurable default.
//!
//! The delay before retry `n` (0-indexed) is `min_wait * 2^n`, clamped to
//! `[min_wait, max_wait]`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::generate::GenerateError;

/// Statuses retried by the default classifier.
pub const DEFAULT_TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry after backoff.
    Transient,
    /// Fail the job immediately.
    Fatal,
}

/// Decides the [`FailureClass`] of a generation failure.
pub trait Classifier: Send + Sync {
    /// Classify `error`.
    fn classify(&self, error: &GenerateError) -> FailureClass;
}

impl<F> Classifier for F
where
    F: Fn(&GenerateError) -> FailureClass + Send + Sync,
{
    fn classify(&self, error: &GenerateError) -> FailureClass {
        self(error)
    }
}

/// Status-code driven classifier.
///
/// Network failures and timeouts are transient. A status response is
/// transient only if its code is listed. Unusable responses and rejected
/// requests are fatal unless `retry_invalid_responses` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusClassifier {
    /// Status codes treated as transient.
    pub transient_statuses: Vec<u16>,
    /// Retry bodies that could not be parsed.
    #[serde(default)]
    pub retry_invalid_responses: bool,
}

impl StatusClassifier {
    /// Classifier retrying exactly `statuses`.
    #[must_use]
    pub fn new(statuses: impl Into<Vec<u16>>) -> Self {
        Self {
            transient_statuses: statuses.into(),
            retry_invalid_responses: false,
        }
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSIENT_STATUSES)
    }
}

impl Classifier for StatusClassifier {
    fn classify(&self, error: &GenerateError) -> FailureClass {
        match error {
            GenerateError::Network(_) | GenerateError::Timeout(_) => FailureClass::Transient,
            GenerateError::Status { status, .. } if self.transient_statuses.contains(status) => {
                FailureClass::Transient
            },
            GenerateError::InvalidResponse(_) if self.retry_invalid_responses => {
                FailureClass::Transient
            },
            _ => FailureClass::Fatal,
        }
    }
}

/// Retry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; never less than 1.
    pub max_attempts: u32,
    /// Delay before the first retry and lower bound of every delay.
    pub min_wait: Duration,
    /// Upper bound of every delay.
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts,
            min_wait,
            max_wait,
        }
    }

    /// Delay before retry `retry` (0-indexed).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let ceiling = self.max_wait.max(self.min_wait);
        let multiplier = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.min_wait
            .checked_mul(multiplier)
            .unwrap_or(ceiling)
            .clamp(self.min_wait, ceiling)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(4), Duration::from_secs(10))
    }
}

/// Successful result of [`run_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// Value produced by the successful attempt.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Total backoff slept between attempts.
    pub backoff: Duration,
}

/// Why [`run_with_retry`] gave up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    /// A non-retryable failure; no further attempt was made.
    #[error("fatal after {attempts} attempt(s): {error}")]
    Fatal {
        /// Attempts made.
        attempts: u32,
        /// The fatal failure.
        error: GenerateError,
    },

    /// Every allowed attempt failed transiently.
    #[error("gave up after {attempts} attempt(s): {error}")]
    Exhausted {
        /// Attempts made (equal to `max_attempts`).
        attempts: u32,
        /// The last failure.
        error: GenerateError,
    },

    /// Shutdown was requested before the next attempt.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts made.
        attempts: u32,
    },
}

impl RetryError {
    /// Attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or exhausts the policy.
///
/// `op` receives the 1-based attempt number. Each attempt must do its own
/// rate limiting. A backoff already in progress always completes; the
/// cancellation token is checked before each retry.
pub async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    classifier: &dyn Classifier,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<Attempted<T>, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    let max_attempts = policy.attempts();
    let mut backoff = Duration::ZERO;
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                    backoff,
                });
            },
            Err(error) => {
                if classifier.classify(&error) == FailureClass::Fatal {
                    debug!(attempt, error = %error, "fatal generation failure");
                    return Err(RetryError::Fatal {
                        attempts: attempt,
                        error,
                    });
                }
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                }

                let delay = policy.delay_for_retry(attempt - 1);
                warn!(
                    attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                backoff += delay;

                if cancel.is_cancelled() {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                attempt += 1;
            },
        }
    }
}
