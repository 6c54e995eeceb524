//! WuxiaWorld.site scraper (WP-Manga theme).

use super::html::{ContentFilter, clean_content, element_text};
use super::{ChapterContent, ChapterListSource, Scraper};
use crate::error::ScraperError;
use crate::model::{ChapterLink, NovelInfo, NovelStatus};
use crate::utils::{clean_title, resolve_url};
use scraper::{Html, Selector};
use std::sync::LazyLock;

/// Emoji images that no longer load, replaced by the characters they showed.
static EMOJI_IMAGES: &[(&str, &str)] = &[
    (
        "https://emojipedia-us.s3.dualstack.us-west-1.amazonaws.com/thumbs/60/apple/81/black-diamond-suit_2666.png",
        "\u{2666}\u{fe0f}",
    ),
    (
        "https://emojipedia-us.s3.dualstack.us-west-1.amazonaws.com/thumbs/120/apple/237/black-spade-suit_2660.png",
        "\u{2660}",
    ),
    (
        "https://emojipedia-us.s3.dualstack.us-west-1.amazonaws.com/thumbs/120/apple/237/black-club-suit_2663.png",
        "\u{2663}",
    ),
];

/// CSS selectors used for parsing.
struct Selectors {
    title: Selector,
    author: Selector,
    genres: Selector,
    tags: Selector,
    summary: Selector,
    meta_items: Selector,
    meta_heading: Selector,
    meta_value: Selector,
    cover: Selector,
    chapters: Selector,
    link: Selector,
    content: Selector,
    content_fallback: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    title: Selector::parse(".post-title h1").unwrap(),
    author: Selector::parse(".author-content a").unwrap(),
    genres: Selector::parse(".genres-content > a").unwrap(),
    tags: Selector::parse(".tags-content > a").unwrap(),
    summary: Selector::parse(".summary__content").unwrap(),
    meta_items: Selector::parse(".post-content_item").unwrap(),
    meta_heading: Selector::parse(".summary-heading").unwrap(),
    meta_value: Selector::parse(".summary-content").unwrap(),
    cover: Selector::parse(".summary_image img").unwrap(),
    chapters: Selector::parse(".wp-manga-chapter").unwrap(),
    link: Selector::parse("a").unwrap(),
    content: Selector::parse("div.reading-content .text-left").unwrap(),
    content_fallback: Selector::parse("div.reading-content").unwrap(),
});

static CONTENT_FILTER: LazyLock<ContentFilter> = LazyLock::new(|| {
    ContentFilter::removing(&[".chapter-warning", "#text-chapter-toolbar"])
        .with_banners(&[r"(?i)read\s*latest\s*chapters\s*at\s*wuxia\s*world"])
        .with_image_text(EMOJI_IMAGES)
        .with_leading_title()
});

/// Scraper for wuxiaworld.site.
#[derive(Debug, Default)]
pub struct WuxiaWorldSiteScraper;

impl WuxiaWorldSiteScraper {
    pub fn new() -> Self {
        Self
    }

    /// `https://wuxiaworld.site/novel/<slug>/`, from a novel or chapter URL.
    fn novel_base(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let slug = parsed
            .path()
            .strip_prefix("/novel/")?
            .split('/')
            .next()
            .filter(|s| !s.is_empty())?;
        Some(format!(
            "{}://{}/novel/{}/",
            parsed.scheme(),
            parsed.host_str()?,
            slug
        ))
    }

    fn meta_value(doc: &Html, heading: &str) -> Option<String> {
        doc.select(&SELECTORS.meta_items)
            .find(|item| {
                item.select(&SELECTORS.meta_heading)
                    .next()
                    .is_some_and(|h| element_text(h).contains(heading))
            })
            .and_then(|item| item.select(&SELECTORS.meta_value).next())
            .map(element_text)
    }
}

impl Scraper for WuxiaWorldSiteScraper {
    fn name(&self) -> &'static str {
        "WuxiaWorld.site"
    }

    fn id(&self) -> &'static str {
        "wuxiaworld-site"
    }

    fn host_patterns(&self) -> &'static [&'static str] {
        &["wuxiaworld.site"]
    }

    fn can_handle(&self, url: &str) -> bool {
        Self::novel_base(url).is_some()
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
            status: Self::meta_value(&doc, "Status")
                .map_or(NovelStatus::Unknown, |s| NovelStatus::from_label(&s)),
            genres: doc.select(&SELECTORS.genres).map(element_text).collect(),
            tags: doc.select(&SELECTORS.tags).map(element_text).collect(),
        })
    }

    fn chapter_list_source(
        &self,
        novel_url: &str,
        _landing_html: &str,
    ) -> Result<ChapterListSource, ScraperError> {
        let base = Self::novel_base(novel_url)
            .ok_or_else(|| ScraperError::InvalidUrl(novel_url.to_string()))?;

        Ok(ChapterListSource::Form {
            url: format!("{}ajax/chapters/", base),
            fields: Vec::new(),
        })
    }

    fn parse_chapter_list(
        &self,
        html: &str,
        novel_url: &str,
    ) -> Result<Vec<ChapterLink>, ScraperError> {
        let doc = Html::parse_document(html);

        let mut chapters: Vec<ChapterLink> = doc
            .select(&SELECTORS.chapters)
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
            .or_else(|| doc.select(&SELECTORS.content_fallback).next())
            .ok_or_else(|| ScraperError::ElementNotFound("div.reading-content".to_string()))?;

        let cleaned = clean_content(container, chapter_url, &CONTENT_FILTER);

        Ok(ChapterContent {
            html: cleaned.html,
            image_urls: cleaned.image_urls,
            title: cleaned.title.map(|t| t.replace(" - : ", ": ")),
        })
    }

    fn parse_cover_image(&self, html: &str, novel_url: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let src = doc.select(&SELECTORS.cover).next().and_then(|img| {
            img.value()
                .attr("data-src")
                .or_else(|| img.value().attr("src"))
        })?;
        resolve_url(novel_url, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOVEL_URL: &str = "https://wuxiaworld.site/novel/martial-peak/";

    const LANDING: &str = r##"
        <html><body>
        <div class="post-title"><h1> Martial Peak </h1></div>
        <div class="summary_image"><a href="#"><img data-src="https://wuxiaworld.site/wp-content/uploads/cover.jpg" src="data:image/gif;base64,R0lGOD"></a></div>
        <div class="post-content">
          <div class="post-content_item"><div class="summary-heading"><h5>Author(s)</h5></div><div class="summary-content"><div class="author-content"><a href="/a/momo">Momo</a></div></div></div>
          <div class="post-content_item"><div class="summary-heading"><h5>Genre(s)</h5></div><div class="summary-content"><div class="genres-content"><a href="/g/1">Action</a><a href="/g/2">Martial Arts</a></div></div></div>
        </div>
        <div class="post-status">
          <div class="post-content_item"><div class="summary-heading"><h5>Status</h5></div><div class="summary-content"> OnGoing </div></div>
        </div>
        <div class="summary__content"><p>The journey to the martial peak is a lonely one.</p></div>
        </body></html>
    "##;

    #[test]
    fn test_parse_novel_info() {
        let info = WuxiaWorldSiteScraper::new().parse_novel_info(LANDING).unwrap();
        assert_eq!(info.title, "Martial Peak");
        assert_eq!(info.author.as_deref(), Some("Momo"));
        assert_eq!(info.status, NovelStatus::Ongoing);
        assert_eq!(info.genres, vec!["Action", "Martial Arts"]);
        assert!(info.tags.is_empty());
        assert_eq!(
            info.summary.as_deref(),
            Some("The journey to the martial peak is a lonely one.")
        );
    }

    #[test]
    fn test_chapter_list_source_from_chapter_url() {
        let source = WuxiaWorldSiteScraper::new()
            .chapter_list_source("https://wuxiaworld.site/novel/martial-peak/chapter-5/", "")
            .unwrap();
        assert_eq!(
            source,
            ChapterListSource::Form {
                url: "https://wuxiaworld.site/novel/martial-peak/ajax/chapters/".to_string(),
                fields: Vec::new(),
            }
        );
    }

    #[test]
    fn test_chapter_list_is_reversed() {
        let html = r#"
            <ul class="main version-chap">
              <li class="wp-manga-chapter"><a href="https://wuxiaworld.site/novel/martial-peak/chapter-2/"> Chapter 2 - Two </a><span class="chapter-release-date"><i>May 1, 2021</i></span></li>
              <li class="wp-manga-chapter"><a href="https://wuxiaworld.site/novel/martial-peak/chapter-1/"> Chapter 1 </a></li>
            </ul>
        "#;
        let chapters = WuxiaWorldSiteScraper::new()
            .parse_chapter_list(html, NOVEL_URL)
            .unwrap();
        assert_eq!(
            chapters,
            vec![
                ChapterLink::new("Chapter 1", "https://wuxiaworld.site/novel/martial-peak/chapter-1/"),
                ChapterLink::new("Chapter 2: Two", "https://wuxiaworld.site/novel/martial-peak/chapter-2/"),
            ]
        );
    }

    #[test]
    fn test_parse_chapter_content() {
        let html = r#"
            <html><body>
            <div class="reading-content">
              <div class="chapter-warning">Warning</div>
              <input type="hidden" value="1">
              <div class="text-left">
                <p>Chapter 5 - The Fight</p>
                <p>Yang Kai drew his sword.</p>
                <div>Read Latest Chapters at WuxiaWorld.Site Only</div>
                <style>.x { color: red }</style>
                <p>Ace of <img src="https://emojipedia-us.s3.dualstack.us-west-1.amazonaws.com/thumbs/120/apple/237/black-spade-suit_2660.png"></p>
              </div>
            </div>
            </body></html>
        "#;
        let content = WuxiaWorldSiteScraper::new()
            .parse_chapter_content(html, "https://wuxiaworld.site/novel/martial-peak/chapter-5/")
            .unwrap();

        assert_eq!(content.title.as_deref(), Some("Chapter 5: The Fight"));
        assert!(content.html.starts_with("<p>Yang Kai drew his sword.</p>"));
        assert!(content.html.ends_with("<p>Ace of \u{2660}</p>"));
        for removed in ["Warning", "Read Latest", "color: red", "The Fight"] {
            assert!(!content.html.contains(removed), "{} was kept", removed);
        }
        assert!(content.image_urls.is_empty());
    }

    #[test]
    fn test_parse_cover_prefers_lazy_source() {
        assert_eq!(
            WuxiaWorldSiteScraper::new()
                .parse_cover_image(LANDING, NOVEL_URL)
                .as_deref(),
            Some("https://wuxiaworld.site/wp-content/uploads/cover.jpg")
        );
    }
}
