//! Cookie loading for the HTTP session.
//!
//! Supports Netscape HTTP cookie files, commonly exported by browser
//! extensions, so sites that need a logged-in or challenge-cleared session
//! can be scraped with the browser's cookies.

use chrono::Utc;
use reqwest::Url;
use reqwest::cookie::Jar;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Cookie entry parsed from a Netscape cookie file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetscapeCookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// `None` for session cookies.
    pub expires_unix: Option<u64>,
    pub name: String,
    pub value: String,
    pub http_only: bool,
}

impl NetscapeCookie {
    fn is_expired(&self, now_unix: u64) -> bool {
        self.expires_unix.is_some_and(|expires| expires <= now_unix)
    }

    /// `Set-Cookie` style string understood by the jar.
    fn header_value(&self) -> String {
        let mut cookie = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.include_subdomains {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie
    }
}

/// Errors that can occur while loading cookies.
#[derive(Error, Debug)]
pub enum CookieError {
    /// Failed to read the cookie file.
    #[error("Failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// Cookie file contains an invalid line.
    #[error("Invalid Netscape cookie line: {0}")]
    InvalidLine(String),

    /// Cookie domain could not be converted into a URL.
    #[error("Invalid cookie domain: {0}")]
    InvalidDomain(String),
}

/// Loads the cookies in `path` into `jar`, skipping expired ones.
///
/// Returns the number of cookies added.
pub fn load_cookie_file(path: &Path, jar: &Jar) -> Result<usize, CookieError> {
    let content = std::fs::read_to_string(path)?;
    let cookies = parse_netscape_cookies(&content)?;
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);

    let mut added = 0;
    for cookie in cookies.iter().filter(|c| !c.is_expired(now)) {
        let host = cookie.domain.trim_start_matches('.');
        if host.is_empty() {
            return Err(CookieError::InvalidDomain(cookie.domain.clone()));
        }
        let url = Url::parse(&format!("https://{}/", host))
            .map_err(|_| CookieError::InvalidDomain(cookie.domain.clone()))?;

        jar.add_cookie_str(&cookie.header_value(), &url);
        added += 1;
    }

    debug!(
        path = %path.display(),
        added,
        expired = cookies.len() - added,
        "loaded cookies"
    );
    Ok(added)
}

/// Parses the tab-separated Netscape cookie format.
pub fn parse_netscape_cookies(content: &str) -> Result<Vec<NetscapeCookie>, CookieError> {
    let mut cookies = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let (http_only, line) = if let Some(stripped) = line.strip_prefix("#HttpOnly_") {
            (true, stripped)
        } else if line.starts_with('#') {
            continue;
        } else {
            (false, line)
        };

        let invalid = || CookieError::InvalidLine(line.to_string());
        let mut parts = line.splitn(7, '\t');
        let domain = parts.next().ok_or_else(invalid)?;
        let include_subdomains = parts.next().ok_or_else(invalid)?.eq_ignore_ascii_case("true");
        let path = parts.next().ok_or_else(invalid)?;
        let secure = parts.next().ok_or_else(invalid)?.eq_ignore_ascii_case("true");
        let expires_raw = parts.next().ok_or_else(invalid)?;
        let name = parts.next().ok_or_else(invalid)?;
        let value = parts.next().ok_or_else(invalid)?;

        let expires_unix = expires_raw.parse::<u64>().ok().filter(|ts| *ts != 0);

        cookies.push(NetscapeCookie {
            domain: domain.to_string(),
            include_subdomains,
            path: path.to_string(),
            secure,
            expires_unix,
            name: name.to_string(),
            value: value.to_string(),
            http_only,
        });
    }

    Ok(cookies)
}
