//! Scraper trait and registry for the supported novel sites.
//!
//! Scrapers only parse: every page they need is fetched by the caller through
//! the shared [`HttpClient`](crate::http::HttpClient), so rate limiting,
//! retries and cookies stay in one place and scrapers can be tested against
//! inline HTML.

pub mod html;
mod novelbin;
mod scribblehub;
mod wuxiaworld;

pub use novelbin::NovelBinScraper;
pub use scribblehub::ScribbleHubScraper;
pub use wuxiaworld::WuxiaWorldSiteScraper;

use crate::error::{RegistryError, ScraperError};
use crate::model::{ChapterLink, NovelInfo};
use std::collections::HashMap;

/// Where a novel's table of contents lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterListSource {
    /// On the landing page itself.
    Landing,
    /// On a separate page fetched with GET.
    Page(String),
    /// Returned by a form POST.
    Form {
        url: String,
        fields: Vec<(String, String)>,
    },
}

/// Parsed chapter body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterContent {
    /// Normalized XHTML fragment.
    pub html: String,
    /// Absolute URLs of embedded images, in order, without duplicates.
    pub image_urls: Vec<String>,
    /// Title found in the chapter page, if better than the listed one.
    pub title: Option<String>,
}

/// Trait for web novel scrapers.
///
/// Each implementation handles one site (or one site engine deployed on
/// several hosts) and turns its HTML into the common model.
pub trait Scraper: Send + Sync {
    /// Returns the human-readable name of this scraper.
    fn name(&self) -> &'static str;

    /// Returns the identifier used in file paths (lowercase, no spaces).
    fn id(&self) -> &'static str;

    /// Hosts this scraper claims. Subdomains match too.
    fn host_patterns(&self) -> &'static [&'static str];

    /// Checks if this scraper can handle the given URL once its host matched.
    fn can_handle(&self, url: &str) -> bool;

    /// Parses title, author and the rest of the metadata from the landing page.
    fn parse_novel_info(&self, html: &str) -> Result<NovelInfo, ScraperError>;

    /// Where to fetch the chapter list from.
    fn chapter_list_source(
        &self,
        _novel_url: &str,
        _landing_html: &str,
    ) -> Result<ChapterListSource, ScraperError> {
        Ok(ChapterListSource::Landing)
    }

    /// Parses chapter links in reading order.
    fn parse_chapter_list(
        &self,
        html: &str,
        novel_url: &str,
    ) -> Result<Vec<ChapterLink>, ScraperError>;

    /// Extracts and normalizes a chapter's content.
    fn parse_chapter_content(
        &self,
        html: &str,
        chapter_url: &str,
    ) -> Result<ChapterContent, ScraperError>;

    /// Finds the cover image URL on the landing page.
    fn parse_cover_image(&self, html: &str, novel_url: &str) -> Option<String>;
}

/// Lowercases the host and strips a leading `www.`.
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Registry of available scrapers, keyed by host pattern.
#[derive(Default)]
pub struct ScraperRegistry {
    scrapers: Vec<Box<dyn Scraper>>,
    hosts: HashMap<String, usize>,
}

impl ScraperRegistry {
    /// Creates a registry without any scrapers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in scraper.
    pub fn with_default_scrapers() -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        registry.register(Box::new(NovelBinScraper::novelbin()))?;
        registry.register(Box::new(NovelBinScraper::novelnext()))?;
        registry.register(Box::new(ScribbleHubScraper::new()))?;
        registry.register(Box::new(WuxiaWorldSiteScraper::new()))?;
        Ok(registry)
    }

    /// Adds a scraper. Fails if any of its host patterns is already claimed.
    pub fn register(&mut self, scraper: Box<dyn Scraper>) -> Result<(), RegistryError> {
        let patterns = scraper.host_patterns();
        if patterns.is_empty() {
            return Err(RegistryError::NoPatterns(scraper.name()));
        }

        for pattern in patterns {
            let host = normalize_host(pattern);
            if let Some(&existing) = self.hosts.get(&host) {
                return Err(RegistryError::ConflictingPattern {
                    pattern: host,
                    existing: self.scrapers[existing].name(),
                    scraper: scraper.name(),
                });
            }
        }

        let index = self.scrapers.len();
        for pattern in patterns {
            self.hosts.insert(normalize_host(pattern), index);
        }
        self.scrapers.push(scraper);
        Ok(())
    }

    /// Finds the scraper for `url` by host, walking up to parent domains.
    pub fn resolve(&self, url: &str) -> Result<&dyn Scraper, ScraperError> {
        let unsupported = || ScraperError::UnsupportedSite(url.to_string());

        let parsed = url::Url::parse(url).map_err(|_| unsupported())?;
        let host = parsed.host_str().map(normalize_host).ok_or_else(unsupported)?;

        let mut candidate = host.as_str();
        let index = loop {
            if let Some(&index) = self.hosts.get(candidate) {
                break index;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return Err(unsupported()),
            }
        };

        let scraper = self.scrapers[index].as_ref();
        if scraper.can_handle(url) {
            Ok(scraper)
        } else {
            Err(unsupported())
        }
    }

    /// Returns all registered scrapers.
    pub fn all(&self) -> &[Box<dyn Scraper>] {
        &self.scrapers
    }
}
