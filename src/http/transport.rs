//! Raw HTTP transport.
//!
//! [`Transport`] is the seam between the rate-limited [`HttpClient`](super::HttpClient)
//! and the network. The production implementation wraps `reqwest` with a shared
//! cookie jar; tests swap in an in-memory `MockTransport`.

use async_trait::async_trait;
use reqwest::Url;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const MAX_REDIRECTS: usize = 10;

/// HTTP method supported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request as handed to the transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// URL-encoded form fields for POST requests.
    pub form: Option<Vec<(String, String)>>,
}

impl Request {
    /// Plain GET request without extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            form: None,
        }
    }
}

/// Unclassified response from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network-level failure; no HTTP status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

/// Sends requests and keeps session cookies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns whatever the server answered.
    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError>;

    /// Stores a `name=value` cookie for the URL's host in the session jar.
    fn set_cookie(&self, url: &str, cookie: &str);
}

/// Transport settings derived from the scraping configuration.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub user_agent: String,
    pub timeout: Duration,
}

/// `reqwest`-backed transport sharing one cookie jar for the session.
pub struct ReqwestTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    /// Builds a transport whose cookies live in `jar`.
    pub fn new(settings: &TransportSettings, jar: Arc<Jar>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .cookie_provider(Arc::clone(&jar))
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self { client, jar })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let url = Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header value: {}", e)))?;
            builder = builder.header(name, value);
        }

        if let Some(fields) = &request.form {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields.iter())
                .finish();
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }

    fn set_cookie(&self, url: &str, cookie: &str) {
        if let Ok(url) = Url::parse(url) {
            self.jar.add_cookie_str(cookie, &url);
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
