//! Exponential backoff for fallible network calls.
//!
//! The policy is explicit: callers pass a [`RetryConfig`] and an async closure,
//! and the error type decides through [`IsRetryable`] whether another attempt
//! can help.

use crate::config::RetryConfig;
use crate::error::{DownloadError, FetchError, FetchErrorKind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies errors as transient (worth retrying) or permanent.
pub trait IsRetryable: Sized {
    fn is_retryable(&self) -> bool;

    /// Converts the last transient error once the attempt budget is spent.
    fn into_exhausted(self, _attempts: u32) -> Self {
        self
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }

    fn into_exhausted(self, attempts: u32) -> Self {
        self.exhausted(attempts)
    }
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Fetch(err) => err.is_retryable(),
            DownloadError::Io { .. } => false,
        }
    }

    fn into_exhausted(self, attempts: u32) -> Self {
        match self {
            DownloadError::Fetch(err) => DownloadError::Fetch(err.exhausted(attempts)),
            other => other,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or
/// `config.max_attempts` attempts have been made.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "request failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, attempts = attempt, "giving up after retries");
                return Err(e.into_exhausted(attempt));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delay before retry number `retry` (1-based), before jitter.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let factor = config
        .backoff_multiplier
        .powi(retry.saturating_sub(1).min(i32::MAX as u32) as i32);
    let secs = config.initial_delay.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        config.max_delay
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Stretches `delay` by up to a quarter, so parallel workers do not retry in lockstep.
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=0.25);
    delay.mul_f64(1.0 + factor)
}
