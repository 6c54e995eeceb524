//! Per-domain token buckets.
//!
//! Every bucket key (by default the request host) gets its own bucket holding
//! `requests` tokens per `interval`. Tokens refill all at once at interval
//! boundaries; a caller that finds the bucket empty sleeps until the next
//! boundary instead of failing.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A requests-per-interval ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub interval: Duration,
}

impl RateLimit {
    /// Creates a limit; zero values are bumped to the smallest usable ones.
    pub fn new(requests: u32, interval: Duration) -> Self {
        Self {
            requests: requests.max(1),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// `requests` per second.
    pub fn per_second(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_second(5)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    window_start: Instant,
}

#[derive(Debug)]
struct TokenBucket {
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(BucketState {
                tokens: limit.requests,
                window_start: Instant::now(),
            }),
        }
    }

    async fn take(&self, key: &str) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.window_start);
                if elapsed >= self.limit.interval {
                    let periods = elapsed.as_nanos() / self.limit.interval.as_nanos();
                    let periods = u32::try_from(periods).unwrap_or(u32::MAX);
                    state.window_start += self.limit.interval * periods;
                    state.tokens = self.limit.requests;
                }

                if state.tokens > 0 {
                    state.tokens -= 1;
                    return;
                }

                state.window_start + self.limit.interval
            };

            debug!(bucket = %key, "rate limit reached, waiting for next interval");
            tokio::time::sleep_until(wake_at).await;
        }
    }
}

/// Shared, concurrency-safe set of token buckets.
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: RateLimit,
    overrides: HashMap<String, RateLimit>,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            overrides: HashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Uses `limit` for `host` and its subdomains instead of the default.
    pub fn with_override(mut self, host: &str, limit: RateLimit) -> Self {
        self.overrides.insert(host.to_ascii_lowercase(), limit);
        self
    }

    /// Waits until a request against `key` may be sent.
    pub async fn acquire(&self, key: &str) {
        // Clone the Arc so the map shard is not locked while waiting.
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.limit_for(key))))
            .clone();

        bucket.take(key).await;
    }

    fn limit_for(&self, key: &str) -> RateLimit {
        let key = key.to_ascii_lowercase();
        let mut candidate = key.as_str();
        loop {
            if let Some(limit) = self.overrides.get(candidate) {
                return *limit;
            }
            match candidate.split_once('.') {
                Some((_, rest)) if !rest.is_empty() => candidate = rest,
                _ => return self.default_limit,
            }
        }
    }
}

/// Default bucket key for a URL: its lowercased host.
///
/// Unparsable URLs share one `unknown` bucket so they are still limited.
pub fn bucket_key(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}
