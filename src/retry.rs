//! Exponential backoff for transient failures
//!
//! ```text
//! attempt 0: immediate
//! retry 1:   base            (jittered to 50-100%)
//! retry 2:   base * 2
//! retry n:   min(base * 2^(n-1), max)
//! ```

use crate::config::RetryConfig;
use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff settings for one kind of request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Un-jittered delay before retry number `retry` (starting at 1)
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Delay with jitter, uniformly within the upper half of the backoff
    pub fn jittered_backoff(&self, retry: usize) -> Duration {
        let delay = self.backoff(retry);
        let millis = delay.as_millis() as u64;
        if millis < 2 {
            return delay;
        }
        let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
        Duration::from_millis(jittered)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0usize;
    loop {
        match op().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(what, retries = retry, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.jittered_backoff(retry);
                warn!(
                    what,
                    retry,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
