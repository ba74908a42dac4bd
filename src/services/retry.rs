//! Retry with decorrelated-jitter backoff.
//!
//! Wraps an async operation in up to `max_retries` attempts. Delay grows by
//! `sleep = min(max_delay, base_delay + rand(0, prev_sleep * 3 - base_delay))`
//! with `prev_sleep` starting at `base_delay`, which spreads concurrent
//! retriers without the lockstep of plain exponential backoff. A
//! server-provided `Retry-After` overrides the computed delay, plus 0–10 %
//! jitter.

use std::future::Future;

use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::domain::error::{AidfError, AidfResult};
use crate::domain::models::config::RateLimitConfig;
use crate::domain::ports::RetryCallback;

/// Context key carrying a server-provided retry delay on provider errors.
pub const RETRY_AFTER_CONTEXT_KEY: &str = "retry_after_ms";

/// Classifier verdict for one error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Server-provided delay that overrides the computed backoff.
    pub retry_after_ms: Option<u64>,
}

impl RetryDecision {
    /// Default classification: the taxonomy's retryable flag plus any
    /// `retry_after_ms` the provider attached to the error context.
    pub fn from_error(err: &AidfError) -> Self {
        Self {
            should_retry: err.is_retryable(),
            retry_after_ms: err
                .context()
                .get(RETRY_AFTER_CONTEXT_KEY)
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Parse a `Retry-After` header value: seconds or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(secs.saturating_mul(1000));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let delta = when.signed_duration_since(chrono::Utc::now());
    Some(delta.num_milliseconds().max(0) as u64)
}

/// Retry policy over categorized errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Run `operation` with retries. `classify` decides whether a given
    /// failure is worth another attempt; `on_retry` is invoked before each
    /// sleep for UI feedback.
    pub async fn execute<T, F, Fut, C>(
        &self,
        mut operation: F,
        classify: C,
        on_retry: Option<&RetryCallback>,
    ) -> AidfResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AidfResult<T>>,
        C: Fn(&AidfError) -> RetryDecision,
    {
        let mut prev_sleep = self.base_delay_ms;
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    let decision = classify(&err);
                    if !decision.should_retry || attempt >= self.max_retries {
                        return Err(err);
                    }

                    let delay_ms = match decision.retry_after_ms {
                        Some(server_ms) => with_retry_after_jitter(server_ms),
                        None => {
                            let computed = self.next_delay(prev_sleep);
                            prev_sleep = computed;
                            computed
                        }
                    };

                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms,
                        error = %err,
                        "retrying after failure"
                    );
                    if let Some(cb) = on_retry {
                        cb(attempt, delay_ms, &err.to_string());
                    }
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// Decorrelated jitter step, capped at `max_delay_ms`.
    fn next_delay(&self, prev_sleep: u64) -> u64 {
        let spread = prev_sleep.saturating_mul(3).saturating_sub(self.base_delay_ms);
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        self.base_delay_ms
            .saturating_add(jitter)
            .min(self.max_delay_ms)
    }
}

/// Server-provided delay plus 0–10 % jitter.
fn with_retry_after_jitter(server_ms: u64) -> u64 {
    let jitter_cap = server_ms / 10;
    if jitter_cap == 0 {
        return server_ms;
    }
    server_ms + rand::rng().random_range(0..=jitter_cap)
}
