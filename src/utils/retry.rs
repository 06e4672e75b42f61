//! Retry with exponential backoff and error classification
//!
//! Unlike a plain retry-everything helper, publishing needs three answers
//! from every failure: retry, retry after a server-provided delay, or give
//! up. Callers supply a classifier mapping their error type onto
//! [`RetryClass`]; the loop handles backoff, jitter and an optional
//! wall-clock deadline after which no new attempt is started.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; retry with backoff
    Retriable,

    /// Transient; the server asked to wait at least this long
    RetriableAfter(Duration),

    /// Permanent; retrying cannot help
    Fatal,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum total attempts, including the first
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Add up to 50% random jitter to each delay
    pub jitter: bool,

    /// No new attempt starts after this instant
    pub deadline: Option<Instant>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            deadline: None,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_delays(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay before retry number `retry` (1-based), before jitter
    fn calculate_delay(&self, retry: u32) -> Duration {
        let exponential = self.base_delay_ms as f64
            * self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        Duration::from_millis((exponential as u64).min(self.max_delay_ms))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(extra)
    }
}

/// Successful result together with how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure of a retried operation
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier declared the error permanent
    Fatal { error: E, attempts: u32 },

    /// Attempts or deadline ran out on a transient error
    Exhausted { error: E, attempts: u32 },
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal { error, attempts } => {
                write!(f, "fatal after {attempts} attempt(s): {error}")
            }
            Self::Exhausted { error, attempts } => {
                write!(f, "exhausted after {attempts} attempt(s): {error}")
            }
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for RetryError<E> {}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal { error, .. } | Self::Exhausted { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Execute an operation with classified retries
///
/// A `RetriableAfter` hint replaces the computed backoff for that retry.
/// When a deadline is set, the loop finishes the attempt in flight but
/// never starts another one past it.
pub async fn with_retry<T, E, F, Fut, C>(
    config: &RetryConfig,
    classify: C,
    operation: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Operation succeeded after retry");
                }
                return Ok(Retried { value, attempts });
            }
            Err(error) => {
                let class = classify(&error);
                if class == RetryClass::Fatal {
                    warn!(attempts, error = %error, "Permanent failure, not retrying");
                    return Err(RetryError::Fatal { error, attempts });
                }
                if attempts >= config.max_attempts {
                    warn!(attempts, error = %error, "Retry attempts exhausted");
                    return Err(RetryError::Exhausted { error, attempts });
                }

                let delay = match class {
                    RetryClass::RetriableAfter(hint) => hint,
                    _ => config.apply_jitter(config.calculate_delay(attempts)),
                };

                if let Some(deadline) = config.deadline {
                    if Instant::now() + delay >= deadline {
                        warn!(attempts, error = %error, "Deadline reached, not retrying");
                        return Err(RetryError::Exhausted { error, attempts });
                    }
                }

                debug!(
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
