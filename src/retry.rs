//! Exponential backoff around [`HttpClient::fetch`].

use crate::http::{FetchOptions, FetchResult, HttpClient};
use std::time::Duration;
use tracing::debug;

/// Observable steps of a retried fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// About to send attempt number `attempt` (1-based).
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed with a retryable error; sleeping `delay`.
    Waiting { attempt: u32, delay: Duration },
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Fetches `url`, retrying retryable failures until the attempts run out.
    ///
    /// The returned attempt count covers every request sent.
    pub async fn fetch<F>(
        &self,
        client: &HttpClient,
        url: &str,
        options: &FetchOptions,
        mut on_event: F,
    ) -> FetchResult
    where
        F: FnMut(RetryEvent),
    {
        let mut sent = 0;
        let mut attempt = 1;

        loop {
            on_event(RetryEvent::Attempting { attempt });
            let mut result = client.fetch(url, options).await;
            sent += result.attempts;
            result.attempts = sent;

            if !result.is_retryable() || attempt >= self.max_attempts {
                return result;
            }

            let delay = self.delay_for(attempt - 1);
            debug!(url, attempt, ?delay, status = ?result.status, "retrying after backoff");
            on_event(RetryEvent::Waiting { attempt, delay });
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
