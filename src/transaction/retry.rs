//! Retry policy for retryable storage conflicts
//!
//! - Deadlock (`40P01`): retried once after a 10-50 ms jitter
//! - Serialization failure (`40001`): retried up to three times
//!
//! Anything else, including a lost version race, is returned as-is. A retry
//! is never started once the request deadline has no room for it.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::context::RequestContext;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub deadlock_retries: u32,
    pub serialization_retries: u32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            deadlock_retries: 1,
            serialization_retries: 3,
            jitter_min_ms: 10,
            jitter_max_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// Policy that surfaces every conflict immediately
    pub fn none() -> Self {
        Self {
            deadlock_retries: 0,
            serialization_retries: 0,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
        }
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max_ms <= self.jitter_min_ms {
            return Duration::from_millis(self.jitter_min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.jitter_min_ms..=self.jitter_max_ms))
    }

    /// Run `attempt` until it succeeds, fails for a non-retryable reason, or
    /// the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, ctx: &RequestContext, op: &str, mut attempt: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut deadlocks = 0u32;
        let mut serialization_failures = 0u32;

        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if err.is_deadlock() {
                if deadlocks >= self.deadlock_retries {
                    tracing::error!(request_id = %ctx.request_id, op, error = %err, "Deadlock persisted after retry");
                    return Err(LedgerError::ServiceUnavailable(format!(
                        "{} aborted by repeated deadlock",
                        op
                    )));
                }
                deadlocks += 1;
                let delay = self.jitter();
                if delay >= ctx.remaining() {
                    return Err(LedgerError::Timeout(format!(
                        "{} has no time left to retry",
                        op
                    )));
                }
                tracing::warn!(request_id = %ctx.request_id, op, attempt = deadlocks, delay_ms = delay.as_millis() as u64, "Deadlock detected, retrying");
                tokio::time::sleep(delay).await;
            } else if err.is_serialization_failure() {
                if serialization_failures >= self.serialization_retries {
                    tracing::error!(request_id = %ctx.request_id, op, error = %err, "Serialization failures exhausted retries");
                    return Err(LedgerError::ServiceUnavailable(format!(
                        "{} could not be serialized",
                        op
                    )));
                }
                serialization_failures += 1;
                if ctx.is_expired() {
                    return Err(LedgerError::Timeout(format!(
                        "{} has no time left to retry",
                        op
                    )));
                }
                tracing::warn!(request_id = %ctx.request_id, op, attempt = serialization_failures, "Serialization failure, retrying");
            } else {
                return Err(err);
            }
        }
    }
}
