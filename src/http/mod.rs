//! Rate-limited, classifying HTTP client.
//!
//! [`HttpClient::fetch`] never returns an `Err`: every outcome is folded into a
//! [`FetchResult`] that says whether the failure is worth retrying. Retrying
//! itself is the caller's business (see [`RetryPolicy`](crate::retry::RetryPolicy)).

mod cache;
mod challenge;
#[cfg(any(test, feature = "test-util"))]
mod mock;
mod rate_limit;
mod transport;

pub use cache::{MemoryCache, ResponseCache};
pub use challenge::{ChallengeSolver, CookieChallengeSolver, is_challenge};
#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub use mock::MockTransport;
pub use rate_limit::{RateLimit, RateLimiter, bucket_key};
pub use transport::{
    Method, RawResponse, ReqwestTransport, Request, Transport, TransportError, TransportSettings,
};

use crate::error::FetchError;
use std::sync::Arc;
use tracing::debug;

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Extra headers, sent after the client's default headers.
    pub headers: Vec<(String, String)>,
    /// Rate-limit bucket; defaults to the URL host.
    pub bucket: Option<String>,
    /// Form fields; when set the request is a POST.
    pub form: Option<Vec<(String, String)>>,
    /// Skip the response cache for this request.
    pub bypass_cache: bool,
}

impl FetchOptions {
    /// POST `fields` as a URL-encoded form.
    pub fn form(fields: Vec<(String, String)>) -> Self {
        Self {
            form: Some(fields),
            ..Self::default()
        }
    }
}

/// A successful response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Classified outcome of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(Response),
    /// 5xx, 429 or a network error.
    RetryableFailure(String),
    /// Any other 4xx, or a request that can never succeed.
    PermanentFailure(String),
}

/// What a fetch produced, with enough detail to decide retry vs. abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub url: String,
    /// Status of the last response, if any was received.
    pub status: Option<u16>,
    /// Requests sent for this URL, including the one after a challenge pass.
    pub attempts: u32,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.outcome, FetchOutcome::RetryableFailure(_))
    }

    /// Unwraps the response or turns the failure into a [`FetchError`].
    pub fn into_response(self) -> Result<Response, FetchError> {
        let (detail, retryable) = match self.outcome {
            FetchOutcome::Success(response) => return Ok(response),
            FetchOutcome::RetryableFailure(detail) => (detail, true),
            FetchOutcome::PermanentFailure(detail) => (detail, false),
        };

        Err(FetchError {
            url: self.url,
            status: self.status,
            attempts: self.attempts,
            detail,
            retryable,
        })
    }

    fn classify(url: &str, attempts: u32, result: Result<RawResponse, TransportError>) -> Self {
        let (status, outcome) = match result {
            Ok(raw) => {
                let status = raw.status;
                let outcome = match status {
                    200..=299 => FetchOutcome::Success(Response {
                        status,
                        content_type: raw.content_type,
                        body: raw.body,
                    }),
                    429 | 500..=599 => FetchOutcome::RetryableFailure(format!("HTTP {}", status)),
                    _ => FetchOutcome::PermanentFailure(format!("HTTP {}", status)),
                };
                (Some(status), outcome)
            }
            Err(TransportError::InvalidRequest(detail)) => {
                (None, FetchOutcome::PermanentFailure(detail))
            }
            Err(e) => (None, FetchOutcome::RetryableFailure(e.to_string())),
        };

        Self {
            url: url.to_string(),
            status,
            attempts,
            outcome,
        }
    }
}

/// HTTP client shared by every worker of a run.
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    solver: Option<Arc<dyn ChallengeSolver>>,
    cache: Option<Arc<dyn ResponseCache>>,
    default_headers: Vec<(String, String)>,
}

impl HttpClient {
    pub fn builder(transport: Arc<dyn Transport>) -> HttpClientBuilder {
        HttpClientBuilder {
            transport,
            default_limit: RateLimit::default(),
            host_limits: Vec::new(),
            solver: None,
            cache: None,
            default_headers: Vec::new(),
        }
    }

    /// Fetches `url` once, waiting for a rate-limit token first.
    ///
    /// A 403, 429 or challenge page triggers at most one challenge pass before
    /// the response is classified.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult {
        let is_get = options.form.is_none();

        if is_get
            && !options.bypass_cache
            && let Some(cache) = &self.cache
            && let Some(body) = cache.get(url).await
        {
            debug!(url, "serving response from cache");
            return FetchResult {
                url: url.to_string(),
                status: Some(200),
                attempts: 0,
                outcome: FetchOutcome::Success(Response {
                    status: 200,
                    content_type: None,
                    body,
                }),
            };
        }

        let key = options.bucket.clone().unwrap_or_else(|| bucket_key(url));
        let request = self.build_request(url, options);

        self.limiter.acquire(&key).await;
        debug!(url, bucket = %key, "sending request");
        let mut attempts = 1;
        let mut result = self.transport.send(&request).await;

        if let Some(solver) = &self.solver {
            let repeat = match &result {
                Ok(response) if is_challenge(response) => {
                    debug!(url, status = response.status, "challenge detected");
                    self.limiter.acquire(&key).await;
                    solver.solve(self.transport.as_ref(), url, response).await
                }
                _ => false,
            };

            if repeat {
                self.limiter.acquire(&key).await;
                attempts += 1;
                result = self.transport.send(&request).await;
            }
        }

        let challenged = matches!(&result, Ok(response) if is_challenge(response));
        let fetched = FetchResult::classify(url, attempts, result);

        if is_get
            && !challenged
            && let (Some(cache), FetchOutcome::Success(response)) = (&self.cache, &fetched.outcome)
        {
            cache.put(url, &response.body).await;
        }

        fetched
    }

    fn build_request(&self, url: &str, options: &FetchOptions) -> Request {
        let mut headers = self.default_headers.clone();
        headers.extend(options.headers.iter().cloned());

        Request {
            method: if options.form.is_some() {
                Method::Post
            } else {
                Method::Get
            },
            url: url.to_string(),
            headers,
            form: options.form.clone(),
        }
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    transport: Arc<dyn Transport>,
    default_limit: RateLimit,
    host_limits: Vec<(String, RateLimit)>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    cache: Option<Arc<dyn ResponseCache>>,
    default_headers: Vec<(String, String)>,
}

impl HttpClientBuilder {
    /// Ceiling applied to every bucket without an override. Default 5/s.
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.default_limit = limit;
        self
    }

    /// Ceiling for one host and its subdomains.
    pub fn host_rate_limit(mut self, host: impl Into<String>, limit: RateLimit) -> Self {
        self.host_limits.push((host.into(), limit));
        self
    }

    pub fn challenge_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> HttpClient {
        let limiter = self
            .host_limits
            .iter()
            .fold(RateLimiter::new(self.default_limit), |limiter, (host, limit)| {
                limiter.with_override(host, *limit)
            });

        HttpClient {
            transport: self.transport,
            limiter,
            solver: self.solver,
            cache: self.cache,
            default_headers: self.default_headers,
        }
    }
}
