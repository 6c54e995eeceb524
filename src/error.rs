//! Error types for webshelf.
//!
//! Uses `thiserror` for structured error definitions. Fatal errors end up in
//! [`PipelineError`]; per-chapter and per-asset errors are collected into the
//! run report instead of aborting the run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing a site's HTML or matching its URLs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScraperError {
    /// Failed to parse HTML content
    #[error("Failed to parse HTML: {0}")]
    ParseError(String),

    /// The required element isn't found in HTML
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// URL parsing or validation failed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No registered scraper claims the URL
    #[error("Unsupported site: {0}")]
    UnsupportedSite(String),
}

/// Error raised while populating a [`ScraperRegistry`](crate::scrapers::ScraperRegistry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two scrapers claim the same host pattern.
    #[error("Host pattern '{pattern}' is already claimed by {existing}; cannot register {scraper}")]
    ConflictingPattern {
        pattern: String,
        existing: &'static str,
        scraper: &'static str,
    },

    /// The scraper does not claim any host.
    #[error("Scraper {0} does not declare any host patterns")]
    NoPatterns(&'static str),
}

/// A logical fetch that did not produce a usable response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to fetch {url} after {attempts} attempt(s): {detail}")]
pub struct FetchError {
    pub url: String,
    /// HTTP status of the last response, if one was received.
    pub status: Option<u16>,
    pub attempts: u32,
    pub detail: String,
    /// Whether the last failure was classified as retryable.
    pub retryable: bool,
}

/// Why a single chapter could not be filled in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChapterFetchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Could not parse chapter content: {0}")]
    Parse(#[from] ScraperError),
}

/// Why an embedded image was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Could not convert image {url}: {reason}")]
    Conversion { url: String, reason: String },

    #[error("Could not store image {url}: {reason}")]
    Storage { url: String, reason: String },
}

/// The novel is not in a state that can be assembled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    #[error("{count} chapter(s) are still pending")]
    ChaptersPending { count: usize },

    #[error("Chapter ordinals are not unique and contiguous from 1")]
    NonContiguousOrdinals,
}

/// Errors from writing or reading the packaged book.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to encode book manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Packaging task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for PackageError {
    fn from(e: std::io::Error) -> Self {
        PackageError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Fatal errors that abort a whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No scraper matches the URL; nothing was fetched.
    #[error(transparent)]
    UnsupportedSite(ScraperError),

    /// The landing page could not be fetched or understood; no chapters were fetched.
    #[error("Could not read novel metadata from {url}: {reason}")]
    NovelMetadata { url: String, reason: String },

    #[error("Cannot assemble book: {0}")]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Package(#[from] PackageError),

    /// An image the caller asked for explicitly could not be used.
    #[error("Cannot use image: {0}")]
    Asset(#[from] AssetError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Cookies(#[from] crate::cookies::CookieError),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
