//! NovelBin (novelbin.net / novelbin.com) and NovelNext (novelnext.org) scraper.
//!
//! Both sites run the same engine; they differ in host and novel URL prefix.
//! The chapter list is served by `/ajax/chapter-archive?novelId=<id>`.

use super::html::{ContentFilter, clean_content, element_text};
use super::{ChapterContent, ChapterListSource, Scraper};
use crate::error::ScraperError;
use crate::model::{ChapterLink, NovelInfo, NovelStatus};
use crate::utils::{clean_title, resolve_url};
use scraper::{Html, Selector};
use std::sync::LazyLock;

/// Per-deployment differences.
#[derive(Debug)]
struct SiteProfile {
    name: &'static str,
    id: &'static str,
    hosts: &'static [&'static str],
    /// Path prefixes of novel and chapter pages.
    path_prefixes: &'static [&'static str],
}

static NOVELBIN: SiteProfile = SiteProfile {
    name: "NovelBin",
    id: "novelbin",
    hosts: &["novelbin.net", "novelbin.com"],
    path_prefixes: &["/n/", "/b/"],
};

static NOVELNEXT: SiteProfile = SiteProfile {
    name: "NovelNext",
    id: "novelnext",
    hosts: &["novelnext.org"],
    path_prefixes: &["/novelnext/", "/nb/"],
};

/// CSS selectors used for parsing.
struct Selectors {
    title: Selector,
    title_fallback: Selector,
    info_items: Selector,
    label: Selector,
    link: Selector,
    summary: Selector,
    tags: Selector,
    novel_id: Selector,
    cover: Selector,
    og_image: Selector,
    chapter_links: Selector,
    content: Selector,
    chapter_title: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    title: Selector::parse(".col-info-desc .desc .title").unwrap(),
    title_fallback: Selector::parse("meta[property='og:title']").unwrap(),
    info_items: Selector::parse("ul.info-meta > li").unwrap(),
    label: Selector::parse("h3").unwrap(),
    link: Selector::parse("a").unwrap(),
    summary: Selector::parse("div.desc-text").unwrap(),
    tags: Selector::parse(".tag-container a").unwrap(),
    novel_id: Selector::parse("#rating[data-novel-id]").unwrap(),
    cover: Selector::parse(".book img").unwrap(),
    og_image: Selector::parse("meta[property='og:image']").unwrap(),
    chapter_links: Selector::parse("ul.list-chapter > li > a").unwrap(),
    content: Selector::parse("#chr-content").unwrap(),
    chapter_title: Selector::parse(".chr-title").unwrap(),
});

static CONTENT_FILTER: LazyLock<ContentFilter> = LazyLock::new(|| {
    ContentFilter::removing(&[".ads", ".ad-insert", ".schedule-text", "div[id^='pf-']"])
        .with_banners(&[r"(?i)^\s*the\s+source\s+of\s+this\s+content\s+is"])
        .with_leading_title()
});

/// Scraper for NovelBin-engine sites.
pub struct NovelBinScraper {
    profile: &'static SiteProfile,
}

impl NovelBinScraper {
    /// Scraper for novelbin.net and novelbin.com.
    pub fn novelbin() -> Self {
        Self { profile: &NOVELBIN }
    }

    /// Scraper for novelnext.org.
    pub fn novelnext() -> Self {
        Self {
            profile: &NOVELNEXT,
        }
    }

    /// Extracts the novel slug that follows the site's path prefix.
    fn novel_slug(&self, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let path = parsed.path();
        self.profile
            .path_prefixes
            .iter()
            .find_map(|prefix| path.strip_prefix(prefix))
            .and_then(|rest| rest.split('/').next())
            .filter(|slug| !slug.is_empty())
            .map(str::to_string)
    }

    fn info_values(doc: &Html, label: &str) -> Vec<String> {
        doc.select(&SELECTORS.info_items)
            .find(|item| {
                item.select(&SELECTORS.label)
                    .next()
                    .is_some_and(|h| element_text(h).to_ascii_lowercase().starts_with(label))
            })
            .map(|item| {
                item.select(&SELECTORS.link)
                    .map(element_text)
                    .filter(|text| !text.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Scraper for NovelBinScraper {
    fn name(&self) -> &'static str {
        self.profile.name
    }

    fn id(&self) -> &'static str {
        self.profile.id
    }

    fn host_patterns(&self) -> &'static [&'static str] {
        self.profile.hosts
    }

    fn can_handle(&self, url: &str) -> bool {
        self.novel_slug(url).is_some()
    }

    fn parse_novel_info(&self, html: &str) -> Result<NovelInfo, ScraperError> {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&SELECTORS.title)
            .next()
            .map(element_text)
            .or_else(|| {
                doc.select(&SELECTORS.title_fallback)
                    .next()
                    .and_then(|m| m.value().attr("content"))
                    .map(|c| c.trim().to_string())
            })
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

        let status = Self::info_values(&doc, "status")
            .first()
            .map_or(NovelStatus::Unknown, |label| NovelStatus::from_label(label));

        Ok(NovelInfo {
            title,
            author: Self::info_values(&doc, "author").into_iter().next(),
            summary,
            status,
            genres: Self::info_values(&doc, "genre"),
            tags: doc.select(&SELECTORS.tags).map(element_text).collect(),
        })
    }

    fn chapter_list_source(
        &self,
        novel_url: &str,
        landing_html: &str,
    ) -> Result<ChapterListSource, ScraperError> {
        let doc = Html::parse_document(landing_html);
        let novel_id = doc
            .select(&SELECTORS.novel_id)
            .next()
            .and_then(|el| el.value().attr("data-novel-id"))
            .map(str::to_string)
            .or_else(|| self.novel_slug(novel_url))
            .ok_or_else(|| ScraperError::InvalidUrl(format!("no novel id in {}", novel_url)))?;

        let parsed =
            url::Url::parse(novel_url).map_err(|e| ScraperError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ScraperError::InvalidUrl(novel_url.to_string()))?;

        Ok(ChapterListSource::Page(format!(
            "{}://{}/ajax/chapter-archive?novelId={}",
            parsed.scheme(),
            host,
            novel_id
        )))
    }

    fn parse_chapter_list(
        &self,
        html: &str,
        novel_url: &str,
    ) -> Result<Vec<ChapterLink>, ScraperError> {
        let doc = Html::parse_document(html);

        let chapters: Vec<ChapterLink> = doc
            .select(&SELECTORS.chapter_links)
            .filter_map(|a| {
                let url = resolve_url(novel_url, a.value().attr("href")?)?;
                let title = a
                    .value()
                    .attr("title")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(a));
                Some(ChapterLink::new(clean_title(&title), url))
            })
            .collect();

        if chapters.is_empty() {
            return Err(ScraperError::ElementNotFound("chapter list".to_string()));
        }
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
            .ok_or_else(|| ScraperError::ElementNotFound("#chr-content".to_string()))?;

        let cleaned = clean_content(container, chapter_url, &CONTENT_FILTER);
        let title = cleaned.title.or_else(|| {
            doc.select(&SELECTORS.chapter_title)
                .next()
                .and_then(|el| el.value().attr("title").map(str::to_string))
                .map(|t| clean_title(&t))
        });

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
            .and_then(|img| {
                img.value()
                    .attr("data-src")
                    .or_else(|| img.value().attr("src"))
            })
            .or_else(|| {
                doc.select(&SELECTORS.og_image)
                    .next()
                    .and_then(|m| m.value().attr("content"))
            })?;

        resolve_url(novel_url, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOVEL_URL: &str = "https://novelbin.net/n/shadow-slave";

    const LANDING: &str = r#"
        <html><head><meta property="og:image" content="https://img.test/og.jpg"></head><body>
        <div class="col-novel-main">
          <div class="col-info-desc">
            <div class="book"><img class="lazy" data-src="/media/cover.jpg" src="/placeholder.gif"></div>
            <div class="desc">
              <h3 class="title">Shadow Slave</h3>
              <ul class="info info-meta">
                <li><h3>Author:</h3><a href="/a/guiltythree">Guiltythree</a></li>
                <li><h3>Genre:</h3><a href="/g/action">Action</a>, <a href="/g/fantasy">Fantasy</a></li>
                <li><h3>Source:</h3>Webnovel</li>
                <li><h3>Status:</h3><a href="/s/ongoing">Ongoing</a></li>
              </ul>
            </div>
          </div>
          <div class="tab-content"><div class="desc-text"><p>Growing up in poverty.</p><p>Sunny never expected anything good.</p></div></div>
          <div class="tag-container"><a href="/t/1">Weak to Strong</a></div>
          <div id="rating" data-novel-id="shadow-slave-id"></div>
        </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_novel_info() {
        let info = NovelBinScraper::novelbin().parse_novel_info(LANDING).unwrap();
        assert_eq!(info.title, "Shadow Slave");
        assert_eq!(info.author.as_deref(), Some("Guiltythree"));
        assert_eq!(info.status, NovelStatus::Ongoing);
        assert_eq!(info.genres, vec!["Action", "Fantasy"]);
        assert_eq!(info.tags, vec!["Weak to Strong"]);
        assert_eq!(
            info.summary.as_deref(),
            Some("Growing up in poverty.\nSunny never expected anything good.")
        );
    }

    #[test]
    fn test_missing_title_is_an_error() {
        let err = NovelBinScraper::novelbin()
            .parse_novel_info("<html><body><p>Not found</p></body></html>")
            .unwrap_err();
        assert_eq!(err, ScraperError::ElementNotFound("novel title".to_string()));
    }

    #[test]
    fn test_chapter_list_source_uses_novel_id() {
        let scraper = NovelBinScraper::novelbin();
        assert_eq!(
            scraper.chapter_list_source(NOVEL_URL, LANDING).unwrap(),
            ChapterListSource::Page(
                "https://novelbin.net/ajax/chapter-archive?novelId=shadow-slave-id".to_string()
            )
        );
        assert_eq!(
            scraper
                .chapter_list_source(NOVEL_URL, "<html></html>")
                .unwrap(),
            ChapterListSource::Page(
                "https://novelbin.net/ajax/chapter-archive?novelId=shadow-slave".to_string()
            )
        );
    }

    #[test]
    fn test_parse_chapter_list() {
        let html = r#"
            <div class="panel-body"><div class="row"><div class="col-xs-12">
            <ul class="list-chapter">
              <li><a href="https://novelbin.net/n/shadow-slave/chapter-1" title="Chapter 1 - Nightmare Begins"><span>Chapter 1</span></a></li>
              <li><a href="/n/shadow-slave/chapter-2" title="Chapter 2: Chapter 2 The Path"><span>Chapter 2</span></a></li>
            </ul></div></div></div>
        "#;
        let chapters = NovelBinScraper::novelbin()
            .parse_chapter_list(html, NOVEL_URL)
            .unwrap();
        assert_eq!(
            chapters,
            vec![
                ChapterLink::new(
                    "Chapter 1: Nightmare Begins",
                    "https://novelbin.net/n/shadow-slave/chapter-1"
                ),
                ChapterLink::new("Chapter 2: The Path", "https://novelbin.net/n/shadow-slave/chapter-2"),
            ]
        );
    }

    #[test]
    fn test_empty_chapter_list_is_an_error() {
        assert!(
            NovelBinScraper::novelbin()
                .parse_chapter_list("<ul class=\"list-chapter\"></ul>", NOVEL_URL)
                .is_err()
        );
    }

    #[test]
    fn test_parse_chapter_content() {
        let html = r#"
            <html><body>
            <a class="chr-title" title="Chapter 1: Nightmare Begins"></a>
            <div id="chr-content">
              <h4>Chapter 1 - Nightmare Begins</h4>
              <p>First line.</p>
              <div class="ads"><script>ads()</script></div>
              <p>The source of this content is novelbin</p>
              <p><img src="/images/map.png"></p>
              <p></p>
              <p>Last line.</p>
            </div>
            </body></html>
        "#;
        let content = NovelBinScraper::novelbin()
            .parse_chapter_content(html, "https://novelbin.net/n/shadow-slave/chapter-1")
            .unwrap();

        assert_eq!(content.title.as_deref(), Some("Chapter 1: Nightmare Begins"));
        assert_eq!(content.image_urls, vec!["https://novelbin.net/images/map.png"]);
        assert!(content.html.contains("<p>First line.</p>"));
        assert!(content.html.contains("<p>Last line.</p>"));
        assert!(!content.html.contains("source of this content"));
        assert!(!content.html.contains("ads"));
        assert!(!content.html.contains("<h4>"));
    }

    #[test]
    fn test_missing_content_is_an_error() {
        assert!(
            NovelBinScraper::novelbin()
                .parse_chapter_content("<html></html>", NOVEL_URL)
                .is_err()
        );
    }

    #[test]
    fn test_parse_cover_image() {
        let scraper = NovelBinScraper::novelbin();
        assert_eq!(
            scraper.parse_cover_image(LANDING, NOVEL_URL).as_deref(),
            Some("https://novelbin.net/media/cover.jpg")
        );
        assert_eq!(
            scraper
                .parse_cover_image(
                    r#"<html><head><meta property="og:image" content="https://img.test/og.jpg"></head></html>"#,
                    NOVEL_URL
                )
                .as_deref(),
            Some("https://img.test/og.jpg")
        );
    }

    #[test]
    fn test_can_handle() {
        assert!(NovelBinScraper::novelbin().can_handle(NOVEL_URL));
        assert!(!NovelBinScraper::novelbin().can_handle("https://novelbin.net/sort/latest"));
        assert!(
            NovelBinScraper::novelnext()
                .can_handle("https://novelnext.org/novelnext/shadow-slave/chapter-1")
        );
    }
}
