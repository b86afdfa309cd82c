//! Linear-backoff retry shared by the outbound dispatcher and the batch runner.

use std::future::Future;
use std::time::Duration;

use cs_core::config::RetryConfig;
use tracing::warn;

use crate::error::{Result, SyncError};

/// Fixed attempt budget with `delay = base_delay * attempt` between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

/// Result of [`RetryPolicy::run`] with the attempt count it reached.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    /// Attempt number of the last call, counting attempts made before this run.
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Call `op` until it succeeds, fails permanently or the budget runs out.
    ///
    /// `prior` is the number of attempts already spent on this operation
    /// (the queue's `attempt` field), so a re-claimed operation never gets
    /// more than `max_retries` attempts in total. At least one attempt is
    /// always made. Non-retryable errors return immediately; exhausting the
    /// budget yields [`SyncError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, prior: u32, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = prior;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if !e.is_retryable() => {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt >= self.max_retries => {
                    warn!(attempt, error = %e, "retry budget exhausted");
                    return Attempted {
                        result: Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        }),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
