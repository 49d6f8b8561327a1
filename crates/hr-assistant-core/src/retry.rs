//! Retry with exponential backoff for external calls.
//!
//! Every embedding and generation request goes through one [`RetryPolicy`]:
//! each attempt runs under a timeout, retryable failures
//! ([`Error::is_retryable`]) are retried after a growing delay, and anything
//! else is returned immediately.
//!
//! Delay before attempt `n` (1-based, `n >= 2`) is
//! `min(base_delay * 2^(n-2), max_delay)`, optionally scaled by a random
//! factor in `[0.5, 1.0]`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Which external service a call targets. Decides how a timeout is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Embedding,
    Generation,
}

impl CallKind {
    fn as_str(&self) -> &'static str {
        match self {
            CallKind::Embedding => "embedding",
            CallKind::Generation => "generation",
        }
    }

    fn timeout_error(&self, timeout: Duration) -> Error {
        let message = format!("{} request timed out after {:?}", self.as_str(), timeout);
        match self {
            CallKind::Embedding => Error::gateway(message),
            CallKind::Generation => Error::generation(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
            ..Self::default()
        }
    }

    /// Backoff before the given retry (1 = first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            capped.mul_f64(factor)
        } else {
            capped
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is reached. The last error is returned.
    pub async fn run<T, F, Fut>(&self, kind: CallKind, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(kind.timeout_error(self.timeout)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(call = kind.as_str(), attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        call = kind.as_str(),
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying external call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
