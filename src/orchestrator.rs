//! Concurrent chapter fetching.
//!
//! The orchestrator walks a novel's pending chapters through
//! `pending -> fetching -> fetched | retry-wait -> fetching | failed` with at
//! most `max_concurrent` chapters in flight. Results are applied to the novel
//! as they arrive, so completion order never matters: chapters keep their
//! ordinals and the assembler sorts by them.

use crate::assets::AssetPipeline;
use crate::error::{AssetError, ChapterFetchError};
use crate::events::{NullSink, ProgressEvent, ProgressSink};
use crate::http::{FetchOptions, HttpClient};
use crate::model::{ChapterStatus, Novel};
use crate::retry::{RetryEvent, RetryPolicy};
use crate::scrapers::html::drop_images;
use crate::scrapers::{ChapterContent, Scraper};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Default number of chapters fetched at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops scheduling further chapters. In-flight fetches still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Chapter counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub total: usize,
    pub pending: usize,
    /// Fetching or waiting to retry.
    pub in_flight: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// Live per-chapter status, readable from any task while a run is going.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    statuses: Arc<Mutex<BTreeMap<u32, ChapterStatus>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, ChapterStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, ordinal: u32, status: ChapterStatus) {
        self.lock().insert(ordinal, status);
    }

    pub fn get(&self, ordinal: u32) -> Option<ChapterStatus> {
        self.lock().get(&ordinal).copied()
    }

    /// Statuses ordered by ordinal.
    pub fn snapshot(&self) -> Vec<(u32, ChapterStatus)> {
        self.lock().iter().map(|(o, s)| (*o, *s)).collect()
    }

    pub fn counts(&self) -> ProgressCounts {
        let statuses = self.lock();
        let mut counts = ProgressCounts {
            total: statuses.len(),
            ..ProgressCounts::default()
        };
        for status in statuses.values() {
            match status {
                ChapterStatus::Pending => counts.pending += 1,
                ChapterStatus::Fetching | ChapterStatus::RetryWait { .. } => counts.in_flight += 1,
                ChapterStatus::Fetched => counts.fetched += 1,
                ChapterStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// A chapter that ended up as a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterFailure {
    pub ordinal: u32,
    pub url: String,
    pub error: ChapterFetchError,
}

/// An image that was dropped from a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub url: String,
    /// Chapter the image was dropped from; `None` for the cover.
    pub chapter: Option<u32>,
    pub error: AssetError,
}

/// Everything non-fatal that happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub chapter_failures: Vec<ChapterFailure>,
    pub asset_failures: Vec<AssetFailure>,
    /// The run was cancelled before every chapter was scheduled.
    pub cancelled: bool,
    /// Chapters never started because of cancellation.
    pub skipped: usize,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.chapter_failures.is_empty() && self.asset_failures.is_empty() && !self.cancelled
    }
}

struct ChapterJob {
    ordinal: u32,
    title: String,
    url: String,
}

struct ChapterOutcome {
    ordinal: u32,
    url: String,
    result: Result<ChapterContent, ChapterFetchError>,
    asset_failures: Vec<AssetFailure>,
}

/// Drives chapter fetches for one novel.
pub struct FetchOrchestrator<'a> {
    client: &'a HttpClient,
    scraper: &'a dyn Scraper,
    assets: Option<&'a AssetPipeline>,
    retry: RetryPolicy,
    max_concurrent: usize,
    tracker: ProgressTracker,
    cancellation: CancellationToken,
    sink: Arc<dyn ProgressSink>,
}

impl<'a> FetchOrchestrator<'a> {
    pub fn new(client: &'a HttpClient, scraper: &'a dyn Scraper) -> Self {
        Self {
            client,
            scraper,
            assets: None,
            retry: RetryPolicy::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            tracker: ProgressTracker::new(),
            cancellation: CancellationToken::new(),
            sink: Arc::new(NullSink),
        }
    }

    /// Resolves embedded images through `assets` after each chapter is parsed.
    pub fn with_assets(mut self, assets: &'a AssetPipeline) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upper bound on chapters in flight; at least 1.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Fetches every non-terminal chapter of `novel` once.
    ///
    /// Chapters that exhaust their retries are marked failed. If the run is
    /// cancelled, unscheduled chapters stay pending.
    pub async fn run(&self, novel: &mut Novel) -> RunReport {
        let jobs: Vec<ChapterJob> = novel
            .chapters
            .iter()
            .filter(|c| !c.status.is_terminal())
            .map(|c| ChapterJob {
                ordinal: c.ordinal,
                title: c.title.clone(),
                url: c.url.clone(),
            })
            .collect();

        for chapter in &mut novel.chapters {
            if !chapter.status.is_terminal() {
                chapter.status = ChapterStatus::Pending;
            }
            self.tracker.set(chapter.ordinal, chapter.status);
        }

        info!(
            novel = %novel.title,
            chapters = jobs.len(),
            concurrency = self.max_concurrent,
            "fetching chapters"
        );

        let mut report = RunReport::default();
        let token = self.cancellation.clone();
        let mut outcomes = stream::iter(jobs)
            .take_while(move |_| futures::future::ready(!token.is_cancelled()))
            .map(|job| self.fetch_chapter(job))
            .buffer_unordered(self.max_concurrent);

        while let Some(outcome) = outcomes.next().await {
            self.apply(novel, outcome, &mut report);
        }

        if self.cancellation.is_cancelled() {
            let remaining = novel
                .chapters
                .iter()
                .filter(|c| c.status == ChapterStatus::Pending)
                .count();
            info!(remaining, "run cancelled");
            report.cancelled = true;
            report.skipped = remaining;
            self.sink.emit(&ProgressEvent::Cancelled { remaining });
        }

        report.chapter_failures.sort_by_key(|f| f.ordinal);
        report
    }

    fn apply(&self, novel: &mut Novel, outcome: ChapterOutcome, report: &mut RunReport) {
        report.asset_failures.extend(outcome.asset_failures);

        let Some(chapter) = novel.chapter_mut(outcome.ordinal) else {
            return;
        };

        match outcome.result {
            Ok(content) => {
                if let Some(title) = content.title.filter(|t| !t.is_empty()) {
                    chapter.title = title;
                }
                chapter.content = Some(content.html);
                chapter.assets = content.image_urls;
                chapter.status = ChapterStatus::Fetched;
                chapter.error = None;
                report.fetched += 1;

                debug!(ordinal = outcome.ordinal, "chapter fetched");
                self.sink.emit(&ProgressEvent::ChapterFetched {
                    ordinal: outcome.ordinal,
                });
            }
            Err(error) => {
                warn!(ordinal = outcome.ordinal, url = %outcome.url, %error, "chapter failed");
                chapter.status = ChapterStatus::Failed;
                chapter.error = Some(error.to_string());
                self.sink.emit(&ProgressEvent::ChapterFailed {
                    ordinal: outcome.ordinal,
                    error: error.to_string(),
                });
                report.chapter_failures.push(ChapterFailure {
                    ordinal: outcome.ordinal,
                    url: outcome.url,
                    error,
                });
            }
        }

        self.tracker.set(outcome.ordinal, chapter.status);
    }

    async fn fetch_chapter(&self, job: ChapterJob) -> ChapterOutcome {
        let ChapterJob {
            ordinal,
            title,
            url,
        } = job;

        self.tracker.set(ordinal, ChapterStatus::Fetching);
        self.sink.emit(&ProgressEvent::ChapterStarted { ordinal, title });

        let mut asset_failures = Vec::new();
        let result = self.fetch_content(ordinal, &url, &mut asset_failures).await;

        ChapterOutcome {
            ordinal,
            url,
            result,
            asset_failures,
        }
    }

    async fn fetch_content(
        &self,
        ordinal: u32,
        url: &str,
        asset_failures: &mut Vec<AssetFailure>,
    ) -> Result<ChapterContent, ChapterFetchError> {
        let response = self
            .retry
            .fetch(self.client, url, &FetchOptions::default(), |event| match event {
                RetryEvent::Attempting { .. } => {
                    self.tracker.set(ordinal, ChapterStatus::Fetching);
                }
                RetryEvent::Waiting { attempt, delay } => {
                    self.tracker.set(ordinal, ChapterStatus::RetryWait { attempt });
                    self.sink.emit(&ProgressEvent::ChapterRetrying {
                        ordinal,
                        attempt,
                        delay,
                    });
                }
            })
            .await
            .into_response()?;

        let mut content = self.scraper.parse_chapter_content(&response.text(), url)?;

        let Some(assets) = self.assets else {
            return Ok(content);
        };

        let mut dropped = Vec::new();
        for image in &content.image_urls {
            if let Err(error) = assets.resolve(image).await {
                warn!(ordinal, url = %image, %error, "dropping image");
                self.sink.emit(&ProgressEvent::AssetDropped {
                    url: image.clone(),
                    error: error.to_string(),
                });
                asset_failures.push(AssetFailure {
                    url: image.clone(),
                    chapter: Some(ordinal),
                    error,
                });
                dropped.push(image.clone());
            }
        }

        if !dropped.is_empty() {
            content.html = drop_images(&content.html, &dropped);
            content.image_urls.retain(|u| !dropped.contains(u));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScraperError;
    use crate::http::{MockTransport, RateLimit, RawResponse, Request, Transport, TransportError};
    use crate::model::{ChapterLink, NovelInfo};
    use crate::scrapers::html::{ContentFilter, clean_content};
    use async_trait::async_trait;
    use scraper::{Html, Selector};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct TestScraper;

    impl Scraper for TestScraper {
        fn name(&self) -> &'static str {
            "Test"
        }
        fn id(&self) -> &'static str {
            "test"
        }
        fn host_patterns(&self) -> &'static [&'static str] {
            &["novels.test"]
        }
        fn can_handle(&self, _url: &str) -> bool {
            true
        }
        fn parse_novel_info(&self, _html: &str) -> Result<NovelInfo, ScraperError> {
            Ok(NovelInfo::default())
        }
        fn parse_chapter_list(
            &self,
            _html: &str,
            _novel_url: &str,
        ) -> Result<Vec<ChapterLink>, ScraperError> {
            Ok(Vec::new())
        }
        fn parse_chapter_content(
            &self,
            html: &str,
            chapter_url: &str,
        ) -> Result<ChapterContent, ScraperError> {
            let doc = Html::parse_document(html);
            let selector = Selector::parse("#content").unwrap();
            let container = doc
                .select(&selector)
                .next()
                .ok_or_else(|| ScraperError::ElementNotFound("#content".to_string()))?;
            let cleaned = clean_content(container, chapter_url, &ContentFilter::default());
            Ok(ChapterContent {
                html: cleaned.html,
                image_urls: cleaned.image_urls,
                title: None,
            })
        }
        fn parse_cover_image(&self, _html: &str, _novel_url: &str) -> Option<String> {
            None
        }
    }

    fn chapter_url(n: u32) -> String {
        format!("https://novels.test/story/{}", n)
    }

    fn page(body: &str) -> String {
        format!("<html><body><div id=\"content\">{}</div></body></html>", body)
    }

    fn novel(chapters: u32) -> Novel {
        let mut novel = Novel::new(
            "https://novels.test/story",
            "Test",
            NovelInfo {
                title: "Story".to_string(),
                ..NovelInfo::default()
            },
        );
        novel.append_chapters(
            (1..=chapters).map(|n| ChapterLink::new(format!("Chapter {}", n), chapter_url(n))),
        );
        novel
    }

    fn client(transport: Arc<dyn Transport>) -> HttpClient {
        HttpClient::builder(transport)
            .rate_limit(RateLimit::per_second(1000))
            .build()
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for RecordingSink {
        fn emit(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chapter_does_not_stop_others() {
        let transport = Arc::new(
            MockTransport::new()
                .with_html(&chapter_url(1), &page("<p>One</p>"))
                .with_status(&chapter_url(2), 500)
                .with_html(&chapter_url(3), &page("<p>Three</p>")),
        );
        let client = client(transport.clone());
        let sink = Arc::new(RecordingSink::default());
        let mut novel = novel(3);

        let orchestrator =
            FetchOrchestrator::new(&client, &TestScraper).with_sink(sink.clone());
        let report = orchestrator.run(&mut novel).await;

        assert_eq!(report.fetched, 2);
        assert_eq!(report.chapter_failures.len(), 1);
        assert_eq!(report.chapter_failures[0].ordinal, 2);
        assert!(matches!(
            &report.chapter_failures[0].error,
            ChapterFetchError::Fetch(e) if e.attempts == 3 && e.status == Some(500)
        ));
        assert_eq!(transport.calls_to(&chapter_url(2)), 3);

        assert_eq!(novel.chapters[0].content.as_deref(), Some("<p>One</p>"));
        assert!(novel.chapters[1].is_failed());
        assert!(novel.chapters[1].error.is_some());
        assert!(novel.is_ready());

        let retries = sink
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::ChapterRetrying { ordinal: 2, .. }))
            .count();
        assert_eq!(retries, 2);
        assert_eq!(
            orchestrator.tracker().counts(),
            ProgressCounts {
                total: 3,
                pending: 0,
                in_flight: 0,
                fetched: 2,
                failed: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_chapter_fails_after_one_attempt() {
        let transport = Arc::new(MockTransport::new().with_status(&chapter_url(1), 404));
        let client = client(transport.clone());
        let mut novel = novel(1);

        let report = FetchOrchestrator::new(&client, &TestScraper)
            .run(&mut novel)
            .await;

        assert_eq!(report.chapter_failures.len(), 1);
        assert_eq!(transport.calls_to(&chapter_url(1)), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_marks_chapter_failed() {
        let transport = Arc::new(
            MockTransport::new().with_html(&chapter_url(1), "<html><body>no content</body></html>"),
        );
        let client = client(transport);
        let mut novel = novel(1);

        let report = FetchOrchestrator::new(&client, &TestScraper)
            .run(&mut novel)
            .await;

        assert!(matches!(
            report.chapter_failures[0].error,
            ChapterFetchError::Parse(ScraperError::ElementNotFound(_))
        ));
        assert!(novel.chapters[0].is_failed());
    }

    /// Counts how many requests are in flight at once.
    struct GateTransport {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for GateTransport {
        async fn send(&self, _request: &Request) -> Result<RawResponse, TransportError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(RawResponse {
                status: 200,
                content_type: None,
                body: page("<p>x</p>").into_bytes(),
            })
        }

        fn set_cookie(&self, _url: &str, _cookie: &str) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let transport = Arc::new(GateTransport {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let client = client(transport.clone());
        let mut novel = novel(7);

        let report = FetchOrchestrator::new(&client, &TestScraper)
            .with_max_concurrent(2)
            .run(&mut novel)
            .await;

        assert_eq!(report.fetched, 7);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    }

    /// Cancels the run as soon as the first chapter lands.
    struct CancelOnFirst(CancellationToken);

    impl ProgressSink for CancelOnFirst {
        fn emit(&self, event: &ProgressEvent) {
            if matches!(event, ProgressEvent::ChapterFetched { .. }) {
                self.0.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_cancellation_leaves_unscheduled_chapters_pending() {
        let mut transport = MockTransport::new();
        for n in 1..=3 {
            transport = transport.with_html(&chapter_url(n), &page("<p>x</p>"));
        }
        let transport = Arc::new(transport);
        let client = client(transport.clone());
        let token = CancellationToken::new();
        let mut novel = novel(3);

        let report = FetchOrchestrator::new(&client, &TestScraper)
            .with_max_concurrent(1)
            .with_cancellation(token.clone())
            .with_sink(Arc::new(CancelOnFirst(token)))
            .run(&mut novel)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(transport.total_calls(), 1);
        assert_eq!(novel.pending_count(), 2);
        assert_eq!(novel.chapters[1].status, ChapterStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_image_is_dropped_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let png: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let transport = Arc::new(
            MockTransport::new()
                .with_html(
                    &chapter_url(1),
                    &page(r#"<p>A<img src="https://cdn.test/ok.png"></p><p>B<img src="https://cdn.test/gone.png"></p>"#),
                )
                .with_response("https://cdn.test/ok.png", 200, Some("image/png"), png)
                .with_status("https://cdn.test/gone.png", 404),
        );
        let client = Arc::new(client(transport));
        let assets = AssetPipeline::new(Arc::clone(&client), dir.path());
        let mut novel = novel(1);

        let report = FetchOrchestrator::new(&client, &TestScraper)
            .with_assets(&assets)
            .run(&mut novel)
            .await;

        assert_eq!(report.fetched, 1);
        assert_eq!(report.asset_failures.len(), 1);
        assert_eq!(report.asset_failures[0].url, "https://cdn.test/gone.png");
        assert_eq!(report.asset_failures[0].chapter, Some(1));

        let chapter = &novel.chapters[0];
        assert_eq!(chapter.assets, vec!["https://cdn.test/ok.png"]);
        let html = chapter.content.as_deref().unwrap();
        assert!(html.contains("ok.png"));
        assert!(!html.contains("gone.png"));
    }
}
