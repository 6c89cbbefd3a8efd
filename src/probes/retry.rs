//! Bounded retry with linear backoff and a hard per-attempt timeout

use backoff::backoff::Backoff;
use backoff::future::retry;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{Error, Result};

/// Retry settings shared by all probes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay after the first failure; the n-th failure waits `n * step`
    pub step: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            attempts: config.retries.max(1),
            step: Duration::from_millis(config.retry_backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.step, self.attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

/// `step, 2*step, 3*step, ...` until the attempt budget is spent
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self {
            step,
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }
        Some(self.step * self.attempt)
    }
}

/// Run `op` under the policy. Retryable errors and timeouts are retried;
/// anything else fails immediately.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let timeout = policy.timeout;
    let timeout_ms = timeout.as_millis() as u64;

    retry(policy.backoff(), || {
        let attempt = op();
        async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("Retryable error in {}: {}", label, e);
                    Err(backoff::Error::transient(e))
                }
                Ok(Err(e)) => {
                    debug!("Permanent error in {}: {}", label, e);
                    Err(backoff::Error::permanent(e))
                }
                Err(_) => {
                    warn!("{} timed out after {}ms", label, timeout_ms);
                    Err(backoff::Error::transient(Error::ProbeTimeout(timeout_ms)))
                }
            }
        }
    })
    .await
}
