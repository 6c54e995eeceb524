//! End-to-end runs against a scripted transport.

use scraper::{Html, Selector};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webshelf::config::ScrapeOptions;
use webshelf::document::{UNAVAILABLE_MARKER, assemble};
use webshelf::epub::read_manifest;
use webshelf::error::{ChapterFetchError, PipelineError, ScraperError};
use webshelf::events::{ProgressEvent, ProgressSink};
use webshelf::http::{HttpClient, MockTransport, RateLimit, Transport};
use webshelf::model::{ChapterLink, NovelInfo};
use webshelf::pipeline::{Session, client_with_transport};
use webshelf::retry::RetryPolicy;
use webshelf::scrapers::html::{ContentFilter, clean_content, element_text};
use webshelf::scrapers::{ChapterContent, Scraper, ScraperRegistry};
use webshelf::utils::resolve_url;

const NOVEL: &str = "https://novels.test/story";
const IMAGE: &str = "https://cdn.novels.test/shared.png";
const COVER: &str = "https://cdn.novels.test/cover.png";
const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// Minimal adapter for the fixture site.
struct FixtureScraper;

fn first<'a>(doc: &'a Html, selector: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(selector).unwrap();
    doc.select(&selector).next()
}

impl Scraper for FixtureScraper {
    fn name(&self) -> &'static str {
        "Fixture"
    }

    fn id(&self) -> &'static str {
        "fixture"
    }

    fn host_patterns(&self) -> &'static [&'static str] {
        &["novels.test"]
    }

    fn can_handle(&self, _url: &str) -> bool {
        true
    }

    fn parse_novel_info(&self, html: &str) -> Result<NovelInfo, ScraperError> {
        let doc = Html::parse_document(html);
        let title = first(&doc, "h1#title")
            .map(element_text)
            .ok_or_else(|| ScraperError::ElementNotFound("h1#title".to_string()))?;
        Ok(NovelInfo {
            title,
            author: first(&doc, "#author").map(element_text),
            ..NovelInfo::default()
        })
    }

    fn parse_chapter_list(
        &self,
        html: &str,
        novel_url: &str,
    ) -> Result<Vec<ChapterLink>, ScraperError> {
        let doc = Html::parse_document(html);
        let links = Selector::parse("#toc a").unwrap();
        Ok(doc
            .select(&links)
            .filter_map(|a| {
                let url = resolve_url(novel_url, a.value().attr("href")?)?;
                Some(ChapterLink::new(element_text(a), url))
            })
            .collect())
    }

    fn parse_chapter_content(
        &self,
        html: &str,
        chapter_url: &str,
    ) -> Result<ChapterContent, ScraperError> {
        let doc = Html::parse_document(html);
        let container = first(&doc, "#content")
            .ok_or_else(|| ScraperError::ElementNotFound("#content".to_string()))?;
        let cleaned = clean_content(container, chapter_url, &ContentFilter::default());
        Ok(ChapterContent {
            html: cleaned.html,
            image_urls: cleaned.image_urls,
            title: None,
        })
    }

    fn parse_cover_image(&self, html: &str, novel_url: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let src = first(&doc, "img#cover")?.value().attr("src")?.to_string();
        resolve_url(novel_url, &src)
    }
}

fn chapter_url(n: u32) -> String {
    format!("{}/{}", NOVEL, n)
}

fn landing(chapters: u32, cover: bool) -> String {
    let toc: String = (1..=chapters)
        .map(|n| format!("<li><a href=\"/story/{}\">Chapter {}</a></li>", n, n))
        .collect();
    let cover = if cover {
        format!("<img id=\"cover\" src=\"{}\">", COVER)
    } else {
        String::new()
    };
    format!(
        "<html><body>{}<h1 id=\"title\">The Story</h1><p id=\"author\">Someone</p><ul id=\"toc\">{}</ul></body></html>",
        cover, toc
    )
}

fn chapter_page(body: &str) -> String {
    format!("<html><body><div id=\"content\">{}</div></body></html>", body)
}

/// Landing page plus `chapters` chapters whose body is "Text N".
fn site(chapters: u32) -> MockTransport {
    (1..=chapters).fold(
        MockTransport::new().with_html(NOVEL, &landing(chapters, false)),
        |transport, n| transport.with_html(&chapter_url(n), &chapter_page(&format!("<p>Text {}</p>", n))),
    )
}

fn options(dir: &Path) -> ScrapeOptions {
    ScrapeOptions {
        rate_limit: RateLimit::per_second(1000),
        retry: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
        max_concurrent: 3,
        solve_challenges: false,
        asset_directory: dir.join("assets"),
        output_directory: dir.to_path_buf(),
        ..ScrapeOptions::default()
    }
}

fn registry() -> ScraperRegistry {
    let mut registry = ScraperRegistry::empty();
    registry.register(Box::new(FixtureScraper)).unwrap();
    registry
}

fn session<'r>(
    registry: &'r ScraperRegistry,
    options: ScrapeOptions,
    transport: &Arc<MockTransport>,
) -> Session<'r> {
    let transport: Arc<dyn Transport> = transport.clone();
    let client: HttpClient = client_with_transport(&options, transport);
    Session::with_client(registry, options, Arc::new(client))
}

#[derive(Default)]
struct FetchOrder(Mutex<Vec<u32>>);

impl ProgressSink for FetchOrder {
    fn emit(&self, event: &ProgressEvent) {
        if let ProgressEvent::ChapterFetched { ordinal } = event {
            self.0.lock().unwrap().push(*ordinal);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_chapter_becomes_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(site(3).with_status(&chapter_url(2), 500));
    let registry = registry();
    let output = dir.path().join("story.epub");

    let summary = session(&registry, options(dir.path()), &transport)
        .run(NOVEL, Some(&output))
        .await
        .unwrap();

    assert_eq!(summary.path, output);
    assert_eq!(transport.calls_to(&chapter_url(2)), 3);
    assert_eq!(summary.report.fetched, 2);
    assert_eq!(summary.report.chapter_failures.len(), 1);
    assert!(matches!(
        &summary.report.chapter_failures[0].error,
        ChapterFetchError::Fetch(e) if e.status == Some(500) && e.attempts == 3
    ));

    let sections = &summary.document.sections;
    assert_eq!(sections.len(), 3);
    assert_eq!(sections[0].body, "<p>Text 1</p>");
    assert!(sections[1].placeholder);
    assert!(sections[1].body.contains(UNAVAILABLE_MARKER));
    assert_eq!(sections[2].body, "<p>Text 3</p>");

    let restored = read_manifest(&output).unwrap();
    assert_eq!(restored.sections, summary.document.sections);
    assert_eq!(restored.metadata.title, "The Story");
    assert_eq!(restored.metadata.author.as_deref(), Some("Someone"));
}

#[tokio::test]
async fn test_shared_image_is_downloaded_once() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("<p>Look<img src=\"{}\"></p>", IMAGE);
    let transport = Arc::new(
        MockTransport::new()
            .with_html(NOVEL, &landing(2, false))
            .with_html(&chapter_url(1), &chapter_page(&body))
            .with_html(&chapter_url(2), &chapter_page(&body))
            .with_response(IMAGE, 200, Some("image/png"), PNG)
            .with_delay(IMAGE, Duration::from_millis(10)),
    );
    let registry = registry();

    let summary = session(&registry, options(dir.path()), &transport)
        .run(NOVEL, None)
        .await
        .unwrap();

    assert_eq!(transport.calls_to(IMAGE), 1);
    assert!(summary.report.is_clean());
    assert_eq!(summary.path, dir.path().join("The Story.epub"));

    let document = &summary.document;
    assert_eq!(document.assets.len(), 1);
    let asset = &document.assets[0];
    assert_eq!(asset.source_url, IMAGE);
    for section in &document.sections {
        assert_eq!(section.images, vec![asset.id.clone()]);
        assert!(section.body.contains(&format!("src=\"{}\"", asset.href)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_document_order_ignores_completion_order() {
    let registry = registry();
    let expected: Vec<String> = (1..=6).map(|n| format!("Chapter {}", n)).collect();
    let mut orders = Vec::new();

    for seed in 0..50u32 {
        let dir = tempfile::tempdir().unwrap();
        let transport = (1..=6).fold(site(6), |transport, n| {
            let delay = u64::from((n * 7 + seed * 3) % 11);
            transport.with_delay(&chapter_url(n), Duration::from_millis(delay))
        });
        let transport = Arc::new(transport);
        let order = Arc::new(FetchOrder::default());
        let mut options = options(dir.path());
        options.max_concurrent = 6;

        let outcome = session(&registry, options, &transport)
            .with_sink(order.clone())
            .scrape(NOVEL)
            .await
            .unwrap();
        let document = assemble(&outcome.novel, &outcome.assets).unwrap();

        let titles: Vec<String> = document.sections.iter().map(|s| s.title.clone()).collect();
        assert_eq!(titles, expected, "seed {}", seed);
        for (i, section) in document.sections.iter().enumerate() {
            assert_eq!(section.body, format!("<p>Text {}</p>", i + 1));
        }
        orders.push(order.0.lock().unwrap().clone());
    }

    assert!(orders.iter().any(|o| o.windows(2).any(|w| w[0] > w[1])));
}

#[tokio::test]
async fn test_unsupported_site_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(site(1));
    let registry = registry();

    let result = session(&registry, options(dir.path()), &transport)
        .run("https://elsewhere.test/story", None)
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::UnsupportedSite(ScraperError::UnsupportedSite(_)))
    ));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_metadata_failure_fetches_no_chapters() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();

    let missing = Arc::new(site(2).with_status(NOVEL, 404));
    let result = session(&registry, options(dir.path()), &missing)
        .run(NOVEL, None)
        .await;
    assert!(matches!(result, Err(PipelineError::NovelMetadata { .. })));
    assert_eq!(missing.total_calls(), 1);

    let untitled = Arc::new(site(2).with_html(NOVEL, "<html><body>maintenance</body></html>"));
    let result = session(&registry, options(dir.path()), &untitled)
        .run(NOVEL, None)
        .await;
    assert!(matches!(result, Err(PipelineError::NovelMetadata { .. })));
    assert_eq!(untitled.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_chapter_is_attempted_once() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(site(2).with_status(&chapter_url(1), 404));
    let registry = registry();

    let summary = session(&registry, options(dir.path()), &transport)
        .run(NOVEL, None)
        .await
        .unwrap();

    assert_eq!(transport.calls_to(&chapter_url(1)), 1);
    assert!(summary.document.sections[0].placeholder);
    assert!(!summary.document.sections[1].placeholder);
}

#[tokio::test]
async fn test_cancelled_run_still_writes_book() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(site(3));
    let registry = registry();
    let session = session(&registry, options(dir.path()), &transport);
    session.cancellation_token().cancel();

    let summary = session.run(NOVEL, None).await.unwrap();

    assert!(summary.report.cancelled);
    assert_eq!(summary.report.skipped, 3);
    assert_eq!(transport.total_calls(), 1);
    assert_eq!(summary.document.sections.len(), 3);
    assert!(summary.document.sections.iter().all(|s| s.placeholder));
    assert!(summary.path.exists());
}

#[tokio::test]
async fn test_chapter_limit_and_cover() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(
        site(3)
            .with_html(NOVEL, &landing(3, true))
            .with_response(COVER, 200, Some("image/png"), PNG),
    );
    let registry = registry();
    let mut options = options(dir.path());
    options.chapter_limit = Some(2);

    let summary = session(&registry, options, &transport)
        .run(NOVEL, None)
        .await
        .unwrap();

    assert_eq!(summary.document.sections.len(), 2);
    assert_eq!(transport.calls_to(&chapter_url(3)), 0);
    let cover = summary.document.cover().unwrap();
    assert_eq!(cover.source_url, COVER);
    assert_eq!(cover.id, "image000");
}

#[tokio::test(start_paused = true)]
async fn test_missing_cover_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(site(1).with_status(COVER, 404));
    let registry = registry();
    let mut options = options(dir.path());
    options.cover_url = Some(COVER.to_string());

    let summary = session(&registry, options, &transport)
        .run(NOVEL, None)
        .await
        .unwrap();

    assert!(summary.document.cover().is_none());
    assert_eq!(summary.report.asset_failures.len(), 1);
    assert_eq!(summary.report.asset_failures[0].chapter, None);
    assert_eq!(transport.calls_to(COVER), 1);
}

#[tokio::test]
async fn test_repeated_links_each_become_a_section() {
    let dir = tempfile::tempdir().unwrap();
    let page = landing(2, false).replace(
        "</ul>",
        "<li><a href=\"/story/2\">Chapter 2 (again)</a></li></ul>",
    );
    let transport = Arc::new(site(2).with_html(NOVEL, &page));
    let registry = registry();

    let summary = session(&registry, options(dir.path()), &transport)
        .run(NOVEL, None)
        .await
        .unwrap();

    let sections = &summary.document.sections;
    assert_eq!(summary.report.fetched, 3);
    assert_eq!(sections.len(), 3);
    assert_eq!(
        sections.iter().map(|s| s.ordinal).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(sections[1].source_url, chapter_url(2));
    assert_eq!(sections[2].source_url, chapter_url(2));
    assert_eq!(sections[2].title, "Chapter 2 (again)");
    assert_eq!(sections[2].body, "<p>Text 2</p>");
}

#[tokio::test]
async fn test_update_fetches_only_new_chapters() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let output = dir.path().join("story.epub");
    let body = format!("<p>Look<img src=\"{}\"></p>", IMAGE);

    let first = Arc::new(
        site(2)
            .with_html(&chapter_url(1), &chapter_page(&body))
            .with_response(IMAGE, 200, Some("image/png"), PNG),
    );
    session(&registry, options(dir.path()), &first)
        .run(NOVEL, Some(&output))
        .await
        .unwrap();

    let later = Arc::new(site(3).with_response(IMAGE, 200, Some("image/png"), PNG));
    let update = session(&registry, options(dir.path()), &later)
        .update(&output, None)
        .await
        .unwrap();

    assert_eq!(update.added, 1);
    assert_eq!(update.retried, 0);
    assert_eq!(later.calls_to(&chapter_url(1)), 0);
    assert_eq!(later.calls_to(&chapter_url(2)), 0);
    assert_eq!(later.calls_to(&chapter_url(3)), 1);
    assert_eq!(later.calls_to(IMAGE), 0);

    let run = update.run.unwrap();
    assert_eq!(run.path, output);
    assert_eq!(run.report.fetched, 1);

    let restored = read_manifest(&output).unwrap();
    assert_eq!(restored.sections.len(), 3);
    assert_eq!(restored.sections[0].body, run.document.sections[0].body);
    assert_eq!(restored.sections[0].images.len(), 1);
    assert_eq!(restored.sections[2].body, "<p>Text 3</p>");
    assert_eq!(restored.assets.len(), 1);
    assert_eq!(restored.assets[0].source_url, IMAGE);
}

#[tokio::test]
async fn test_update_with_nothing_new_leaves_book_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let output = dir.path().join("story.epub");

    let transport = Arc::new(site(2));
    session(&registry, options(dir.path()), &transport)
        .run(NOVEL, Some(&output))
        .await
        .unwrap();
    let before = std::fs::read(&output).unwrap();

    let again = Arc::new(site(2));
    let update = session(&registry, options(dir.path()), &again)
        .update(&output, None)
        .await
        .unwrap();

    assert_eq!(update.added, 0);
    assert_eq!(update.retried, 0);
    assert!(update.run.is_none());
    assert_eq!(again.calls_to(NOVEL), 1);
    assert_eq!(again.calls_to(&chapter_url(1)), 0);
    assert_eq!(std::fs::read(&output).unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_update_retries_placeholders_and_honours_limit() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let output = dir.path().join("story.epub");

    let first = Arc::new(site(2).with_status(&chapter_url(2), 500));
    session(&registry, options(dir.path()), &first)
        .run(NOVEL, Some(&output))
        .await
        .unwrap();
    assert!(read_manifest(&output).unwrap().sections[1].placeholder);

    let later = Arc::new(site(5));
    let update = session(&registry, options(dir.path()), &later)
        .update(&output, Some(1))
        .await
        .unwrap();

    assert_eq!(update.added, 1);
    assert_eq!(update.retried, 1);
    assert_eq!(later.calls_to(&chapter_url(2)), 1);
    assert_eq!(later.calls_to(&chapter_url(4)), 0);

    let restored = read_manifest(&output).unwrap();
    assert_eq!(restored.sections.len(), 3);
    assert!(restored.placeholders().next().is_none());
    assert_eq!(restored.sections[1].body, "<p>Text 2</p>");
}

#[tokio::test]
async fn test_set_cover_from_file_and_url() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let output = dir.path().join("story.epub");

    let transport = Arc::new(site(1).with_response(COVER, 200, Some("image/png"), PNG));
    session(&registry, options(dir.path()), &transport)
        .run(NOVEL, Some(&output))
        .await
        .unwrap();
    assert!(read_manifest(&output).unwrap().cover().is_none());

    let local = dir.path().join("mine.png");
    std::fs::write(&local, PNG).unwrap();
    let local = local.display().to_string();
    let summary = session(&registry, options(dir.path()), &transport)
        .set_cover(&output, &local)
        .await
        .unwrap();
    assert_eq!(summary.document.cover().unwrap().source_url, local);
    assert_eq!(transport.calls_to(NOVEL), 1);

    session(&registry, options(dir.path()), &transport)
        .set_cover(&output, COVER)
        .await
        .unwrap();

    let restored = read_manifest(&output).unwrap();
    let cover = restored.cover().unwrap();
    assert_eq!(cover.source_url, COVER);
    assert_eq!(restored.assets.len(), 1);
    assert_eq!(restored.sections.len(), 1);
    assert_eq!(restored.sections[0].body, "<p>Text 1</p>");
    assert_eq!(transport.calls_to(COVER), 1);
}
