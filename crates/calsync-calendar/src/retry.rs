//! Caller-side retries with exponential backoff.
//!
//! The orchestrator never retries on its own. Callers wrap whole operations
//! with [`with_retry`]; `create_or_update` is idempotent, so replaying it after
//! a transient failure is safe.
//!
//! Only errors classified as [`ErrorKind::Transient`] are retried. Missing
//! events, auth failures, bad input and storage errors are returned at once.
//! A `Retry-After` longer than `max_delay` also ends the retries.

use std::future::Future;
use std::time::Duration;

use crate::error::{CalendarError, ErrorKind, SyncError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt)
    pub initial_delay: Duration,
    /// Upper bound for any single delay. A server asking for a longer wait
    /// gets its error back instead.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Backoff before retry number `attempt + 1`: `initial_delay * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }
}

/// Errors that know whether replaying the operation may help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait the remote side asked for, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for CalendarError {
    fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CalendarError::RateLimited(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Remote(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Run `operation`, retrying transient failures.
///
/// Returns the first success, the first non-retryable error, the first error
/// whose retry hint exceeds `max_delay`, or the last error once retries are
/// exhausted.
///
/// ```ignore
/// let outcome = with_retry(&RetryConfig::default(), || {
///     engine.create_or_update(&key, &event, None, "manual")
/// })
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    let total_attempts = config.max_retries.saturating_add(1);

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Operation succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::debug!("Non-retryable error: {}", e);
                return Err(e);
            }
            Err(e) if attempt >= config.max_retries => {
                tracing::error!(
                    "All {} attempts exhausted, last error: {}",
                    total_attempts,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                let backoff = config.delay_for_attempt(attempt);
                let delay = match e.retry_after() {
                    Some(hint) if hint > config.max_delay => {
                        tracing::warn!(
                            "Server asked to wait {:?}, longer than the {:?} limit: {}",
                            hint,
                            config.max_delay,
                            e
                        );
                        return Err(e);
                    }
                    Some(hint) => hint.max(backoff),
                    None => backoff,
                };

                tracing::warn!(
                    "Retryable error on attempt {} of {}: {} (waiting {:?})",
                    attempt.saturating_add(1),
                    total_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
