//! Scripted in-memory transport.
//!
//! Used by the test suites to drive the client, orchestrator and asset
//! pipeline without a network, and to count how often each URL was requested.

use super::transport::{RawResponse, Request, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

type Reply = Result<RawResponse, TransportError>;

#[derive(Debug, Default)]
struct Route {
    /// Replies served in order; the last one repeats forever.
    replies: VecDeque<Reply>,
    delay: Duration,
}

/// Transport that answers from a table of scripted replies.
///
/// Unknown URLs answer `404`.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<Request>>,
    cookies: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `html` with status 200.
    pub fn with_html(self, url: &str, html: &str) -> Self {
        self.with_response(url, 200, Some("text/html; charset=utf-8"), html.as_bytes())
    }

    /// Serves an empty body with `status`.
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.with_response(url, status, Some("text/html"), b"")
    }

    /// Serves `body` with the given status and content type.
    pub fn with_response(
        self,
        url: &str,
        status: u16,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Self {
        self.with_sequence(
            url,
            vec![Ok(RawResponse {
                status,
                content_type: content_type.map(str::to_string),
                body: body.to_vec(),
            })],
        )
    }

    /// Serves the replies in order, repeating the last one.
    pub fn with_sequence(self, url: &str, replies: Vec<Reply>) -> Self {
        self.lock_routes().entry(url.to_string()).or_default().replies = replies.into();
        self
    }

    /// Delays every reply for `url`.
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        self.lock_routes().entry(url.to_string()).or_default().delay = delay;
        self
    }

    /// Number of requests sent to `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.lock_requests().iter().filter(|r| r.url == url).count()
    }

    /// Number of requests sent overall.
    pub fn total_calls(&self) -> usize {
        self.lock_requests().len()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock_requests().clone()
    }

    /// Cookies stored through [`Transport::set_cookie`] as `(url, cookie)`.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<Request>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, url: &str) -> (Reply, Duration) {
        let mut routes = self.lock_routes();
        let Some(route) = routes.get_mut(url) else {
            return (
                Ok(RawResponse {
                    status: 404,
                    content_type: None,
                    body: Vec::new(),
                }),
                Duration::ZERO,
            );
        };

        let reply = if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        };
        let reply = reply.unwrap_or_else(|| Err(TransportError::Other("no reply scripted".into())));
        (reply, route.delay)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
        self.lock_requests().push(request.clone());
        let (reply, delay) = self.next_reply(&request.url);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    fn set_cookie(&self, url: &str, cookie: &str) {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), cookie.to_string()));
    }
}
