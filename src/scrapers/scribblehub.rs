//! ScribbleHub (scribblehub.com) scraper.
//!
//! The table of contents comes from a WordPress admin-ajax call that returns
//! every release newest first.

use super::html::{ContentFilter, clean_content, element_text};
use super::{ChapterContent, ChapterListSource, Scraper};
use crate::error::ScraperError;
use crate::model::{ChapterLink, NovelInfo, NovelStatus};
use crate::utils::{clean_title, resolve_url};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

const AJAX_URL: &str = "https://www.scribblehub.com/wp-admin/admin-ajax.php";

static SERIES_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/series/(\d+)/").unwrap());
static STATUS_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*?)\s+-\s+").unwrap());

/// CSS selectors used for parsing.
struct Selectors {
    title: Selector,
    author: Selector,
    summary: Selector,
    genres: Selector,
    tags: Selector,
    cover: Selector,
    post_id: Selector,
    similar_items: Selector,
    status_icon: Selector,
    span: Selector,
    releases: Selector,
    link: Selector,
    content: Selector,
    chapter_title: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    title: Selector::parse("div.fic_title").unwrap(),
    author: Selector::parse("span.auth_name_fic").unwrap(),
    summary: Selector::parse(".wi_fic_desc").unwrap(),
    genres: Selector::parse("a.fic_genre").unwrap(),
    tags: Selector::parse(".wi_fic_showtags_inner a.stag").unwrap(),
    cover: Selector::parse(".fic_image img").unwrap(),
    post_id: Selector::parse("#mypostid").unwrap(),
    similar_items: Selector::parse("ul.widget_fic_similar li").unwrap(),
    status_icon: Selector::parse("span > i.status").unwrap(),
    span: Selector::parse("span").unwrap(),
    releases: Selector::parse("li").unwrap(),
    link: Selector::parse("a").unwrap(),
    content: Selector::parse("#chp_raw").unwrap(),
    chapter_title: Selector::parse(".chapter-title").unwrap(),
});

static CONTENT_FILTER: LazyLock<ContentFilter> =
    LazyLock::new(|| ContentFilter::removing(&[".p-avatar-wrap", ".wi_news", ".modern-footnotes-footnote__connector"]));

/// Scraper for scribblehub.com.
#[derive(Debug, Default)]
pub struct ScribbleHubScraper;

impl ScribbleHubScraper {
    pub fn new() -> Self {
        Self
    }

    /// Reads the status from the sidebar entry that carries the status icon.
    fn parse_status(doc: &Html) -> NovelStatus {
        let Some(item) = doc
            .select(&SELECTORS.similar_items)
            .find(|li| li.select(&SELECTORS.status_icon).next().is_some())
        else {
            return NovelStatus::Unknown;
        };

        let text = item
            .select(&SELECTORS.span)
            .nth(1)
            .map(element_text)
            .unwrap_or_default();
        let label = STATUS_PREFIX
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map_or(text.as_str(), |m| m.as_str());

        NovelStatus::from_label(label)
    }
}

impl Scraper for ScribbleHubScraper {
    fn name(&self) -> &'static str {
        "ScribbleHub"
    }

    fn id(&self) -> &'static str {
        "scribblehub"
    }

    fn host_patterns(&self) -> &'static [&'static str] {
        &["scribblehub.com"]
    }

    fn can_handle(&self, url: &str) -> bool {
        url::Url::parse(url).is_ok_and(|u| {
            let path = u.path();
            path.starts_with("/series/") || path.starts_with("/read/")
        })
    }

    fn parse_novel_info(&self, html: &str) -> Result<NovelInfo, ScraperError> {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&SELECTORS.title)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ScraperError::ElementNotFound("novel title".to_string()))?;

        let summary = doc
            .select(&SELECTORS.summary)
            .next()
            .map(|el| {
                el.text()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|s| !s.is_empty());

        Ok(NovelInfo {
            title,
            author: doc.select(&SELECTORS.author).next().map(element_text),
            summary,
            status: Self::parse_status(&doc),
            genres: doc.select(&SELECTORS.genres).map(element_text).collect(),
            tags: doc.select(&SELECTORS.tags).map(element_text).collect(),
        })
    }

    fn chapter_list_source(
        &self,
        novel_url: &str,
        landing_html: &str,
    ) -> Result<ChapterListSource, ScraperError> {
        let from_url = SERIES_ID
            .captures(novel_url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let post_id = from_url
            .or_else(|| {
                Html::parse_document(landing_html)
                    .select(&SELECTORS.post_id)
                    .next()
                    .and_then(|el| el.value().attr("value"))
                    .map(str::to_string)
            })
            .ok_or_else(|| ScraperError::InvalidUrl(format!("no series id in {}", novel_url)))?;

        Ok(ChapterListSource::Form {
            url: AJAX_URL.to_string(),
            fields: vec![
                ("action".to_string(), "wi_getreleases_pagination".to_string()),
                ("pagenum".to_string(), "-1".to_string()),
                ("mypostid".to_string(), post_id),
            ],
        })
    }

    fn parse_chapter_list(
        &self,
        html: &str,
        novel_url: &str,
    ) -> Result<Vec<ChapterLink>, ScraperError> {
        let doc = Html::parse_document(html);

        let mut chapters: Vec<ChapterLink> = doc
            .select(&SELECTORS.releases)
            .filter_map(|li| {
                let a = li.select(&SELECTORS.link).next()?;
                let url = resolve_url(novel_url, a.value().attr("href")?)?;
                Some(ChapterLink::new(clean_title(&element_text(a)), url))
            })
            .collect();

        if chapters.is_empty() {
            return Err(ScraperError::ElementNotFound("chapter list".to_string()));
        }

        // Newest first on the site.
        chapters.reverse();
        Ok(chapters)
    }

    fn parse_chapter_content(
        &self,
        html: &str,
        chapter_url: &str,
    ) -> Result<ChapterContent, ScraperError> {
        let doc = Html::parse_document(html);
        let container = doc
            .select(&SELECTORS.content)
            .next()
            .ok_or_else(|| ScraperError::ElementNotFound("#chp_raw".to_string()))?;

        let cleaned = clean_content(container, chapter_url, &CONTENT_FILTER);
        let title = doc
            .select(&SELECTORS.chapter_title)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .map(|t| clean_title(&t));

        Ok(ChapterContent {
            html: cleaned.html,
            image_urls: cleaned.image_urls,
            title,
        })
    }

    fn parse_cover_image(&self, html: &str, novel_url: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let src = doc
            .select(&SELECTORS.cover)
            .next()
            .and_then(|img| img.value().attr("src"))?;
        resolve_url(novel_url, src)
    }
}
