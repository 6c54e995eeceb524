//! Best-effort handling of anti-bot challenge pages.
//!
//! Nothing here can defeat a real JavaScript challenge. The default solver
//! covers the cheap cases: pages that set a cookie from inline script, and
//! sites that only want a session cookie from their front page first.

use super::transport::{RawResponse, Request, Transport};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Body fragments that identify known interstitial challenge pages.
const CHALLENGE_SIGNATURES: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "/cdn-cgi/challenge-platform/",
    "<title>Just a moment...</title>",
    "DDoS-Guard",
];

/// `document.cookie = "name=value; path=/"` assignments in inline scripts.
static DOCUMENT_COOKIE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"document\.cookie\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Returns true if the response warrants a challenge pass.
pub fn is_challenge(response: &RawResponse) -> bool {
    if matches!(response.status, 403 | 429) {
        return true;
    }

    let body = String::from_utf8_lossy(&response.body);
    CHALLENGE_SIGNATURES.iter().any(|sig| body.contains(sig))
}

/// Extension point for re-deriving whatever a site demands before serving content.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Attempts one pass. Returns true if the original request is worth repeating.
    async fn solve(&self, transport: &dyn Transport, url: &str, response: &RawResponse) -> bool;
}

/// Harvests script-set cookies, or primes the site root for session cookies.
#[derive(Debug, Default, Clone, Copy)]
pub struct CookieChallengeSolver;

impl CookieChallengeSolver {
    fn script_cookies(body: &str) -> Vec<String> {
        DOCUMENT_COOKIE
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|cookie| cookie.contains('='))
            .collect()
    }

    fn origin(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{}://{}:{}/", parsed.scheme(), host, port),
            None => format!("{}://{}/", parsed.scheme(), host),
        })
    }
}

#[async_trait]
impl ChallengeSolver for CookieChallengeSolver {
    async fn solve(&self, transport: &dyn Transport, url: &str, response: &RawResponse) -> bool {
        let cookies = Self::script_cookies(&response.text());
        if !cookies.is_empty() {
            debug!(url, count = cookies.len(), "applying script-set cookies");
            for cookie in &cookies {
                transport.set_cookie(url, cookie);
            }
            return true;
        }

        let Some(origin) = Self::origin(url) else {
            return false;
        };
        if origin == url {
            return false;
        }

        debug!(url, origin = %origin, "priming session cookies from site root");
        matches!(
            transport.send(&Request::get(origin)).await,
            Ok(primed) if (200..300).contains(&primed.status)
        )
    }
}
