// src/translate/retry.rs
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

use super::engine::{Backoff, TranslateError, TranslationConfig};

/// Upper bound for a single back-off sleep.
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(cfg: &TranslationConfig) -> Self {
        Self {
            attempts: cfg.retry_count.saturating_add(1),
            delay: cfg.retry_delay,
            backoff: cfg.backoff,
        }
    }

    /// Sleep before attempt `attempt + 1` (1-based `attempt` just failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let d = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        };
        d.min(MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Non-retryable errors are
    /// returned as-is; exhausting the budget yields [`TranslateError::Exhausted`].
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, TranslateError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TranslateError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    counter!("translate_retries_exhausted_total").increment(1);
                    return Err(TranslateError::Exhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let wait = self.delay_for(attempt);
                    warn!(
                        target: "translate",
                        attempt,
                        max = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "translation attempt failed, retrying"
                    );
                    counter!("translate_retries_total").increment(1);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
