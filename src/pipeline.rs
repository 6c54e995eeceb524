//! End-to-end run: URL in, book out.
//!
//! A [`Session`] resolves the site adapter, reads the landing page and the
//! table of contents, hands the chapters to the [`FetchOrchestrator`], then
//! assembles and packages whatever it got. Only problems that leave nothing
//! to package are errors; everything else lands in the [`RunReport`].
//!
//! Books written by a session can be brought up to date with
//! [`Session::update`] or given a new cover with [`Session::set_cover`];
//! both start from the manifest embedded in the EPUB.

use crate::assets::{AssetPipeline, SniffingConverter};
use crate::config::ScrapeOptions;
use crate::cookies::load_cookie_file;
use crate::document::{Document, assemble, restore};
use crate::epub::{EpubPackager, Packager, unpack};
use crate::error::{PackageError, PipelineError};
use crate::events::{NullSink, ProgressEvent, ProgressSink};
use crate::http::{
    CookieChallengeSolver, FetchOptions, HttpClient, ReqwestTransport, Transport,
    TransportSettings,
};
use crate::model::{Asset, ChapterLink, Novel};
use crate::orchestrator::{
    AssetFailure, CancellationToken, FetchOrchestrator, ProgressTracker, RunReport,
};
use crate::scrapers::{ChapterListSource, Scraper, ScraperRegistry};
use crate::utils::clean_filename;
use reqwest::cookie::Jar;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Reason recorded on chapters that were never fetched because of cancellation.
const CANCELLED_REASON: &str = "run cancelled before this chapter was fetched";

/// A scraped novel before assembly.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub novel: Novel,
    pub report: RunReport,
    /// Downloaded images keyed by source URL.
    pub assets: HashMap<String, Asset>,
}

/// A finished run.
#[derive(Debug)]
pub struct RunSummary {
    pub path: PathBuf,
    pub document: Document,
    pub report: RunReport,
}

/// Outcome of [`Session::update`].
#[derive(Debug)]
pub struct UpdateSummary {
    /// Chapters the site lists that the book did not have.
    pub added: usize,
    /// Placeholder chapters that were fetched again.
    pub retried: usize,
    /// `None` when there was nothing to fetch and the book was left untouched.
    pub run: Option<RunSummary>,
}

/// Subdirectory of the asset directory that images of an existing book are
/// unpacked into.
const RESTORED_DIR: &str = "restored";

/// Builds the production client: reqwest transport, session cookies, rate
/// limits, default headers and the challenge solver.
pub fn build_client(options: &ScrapeOptions) -> Result<HttpClient, PipelineError> {
    let jar = Arc::new(Jar::default());
    if let Some(path) = &options.cookie_file {
        load_cookie_file(path, &jar)?;
    }

    let transport = ReqwestTransport::new(
        &TransportSettings {
            user_agent: options.user_agent.clone(),
            timeout: options.timeout,
        },
        jar,
    )?;

    Ok(client_with_transport(options, Arc::new(transport)))
}

/// Applies the rate limits, headers and challenge setting of `options` to `transport`.
pub fn client_with_transport(options: &ScrapeOptions, transport: Arc<dyn Transport>) -> HttpClient {
    let mut builder = HttpClient::builder(transport).rate_limit(options.rate_limit);
    for (host, limit) in &options.host_limits {
        builder = builder.host_rate_limit(host.clone(), *limit);
    }
    for (name, value) in &options.headers {
        builder = builder.default_header(name.clone(), value.clone());
    }
    if options.solve_challenges {
        builder = builder.challenge_solver(Arc::new(CookieChallengeSolver));
    }
    builder.build()
}

/// One scraping session against a registry of site adapters.
pub struct Session<'r> {
    registry: &'r ScraperRegistry,
    options: ScrapeOptions,
    client: Arc<HttpClient>,
    packager: Arc<dyn Packager>,
    sink: Arc<dyn ProgressSink>,
    tracker: ProgressTracker,
    cancellation: CancellationToken,
}

impl<'r> Session<'r> {
    /// Creates a session that talks to the network.
    pub fn new(registry: &'r ScraperRegistry, options: ScrapeOptions) -> Result<Self, PipelineError> {
        let client = build_client(&options)?;
        Ok(Self::with_client(registry, options, Arc::new(client)))
    }

    /// Creates a session around an existing client.
    pub fn with_client(
        registry: &'r ScraperRegistry,
        options: ScrapeOptions,
        client: Arc<HttpClient>,
    ) -> Self {
        Self {
            registry,
            options,
            client,
            packager: Arc::new(EpubPackager::new()),
            sink: Arc::new(NullSink),
            tracker: ProgressTracker::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_packager(mut self, packager: Arc<dyn Packager>) -> Self {
        self.packager = packager;
        self
    }

    /// Token that stops the session from scheduling more chapters.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Live per-chapter status of the current run.
    pub fn progress(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn options(&self) -> &ScrapeOptions {
        &self.options
    }

    /// Scrapes `url` and fetches every chapter, without packaging.
    pub async fn scrape(&self, url: &str) -> Result<ScrapeOutcome, PipelineError> {
        let scraper = self.scraper_for(url)?;
        info!(url, scraper = scraper.name(), "scraping novel");

        let (mut novel, links) = self.read_novel(scraper, url).await?;
        novel.load_chapters(links);
        if let Some(limit) = self.options.chapter_limit {
            novel.truncate_chapters(limit);
        }
        info!(title = %novel.title, chapters = novel.chapters.len(), "novel resolved");

        let (report, assets) = self.fetch_chapters(scraper, &mut novel, &HashMap::new()).await;
        Ok(ScrapeOutcome {
            novel,
            report,
            assets,
        })
    }

    /// Scrapes `url` and writes the book to `output`, or to
    /// `<output_directory>/<title>.epub` when no path is given.
    ///
    /// A cancelled run still produces a book, with placeholders for the
    /// chapters that were never fetched.
    pub async fn run(&self, url: &str, output: Option<&Path>) -> Result<RunSummary, PipelineError> {
        let ScrapeOutcome {
            novel,
            report,
            assets,
        } = self.scrape(url).await?;

        let path = output.map(Path::to_path_buf).unwrap_or_else(|| {
            self.options
                .output_directory
                .join(format!("{}.epub", clean_filename(&novel.title)))
        });
        self.finish(novel, assets, report, path).await
    }

    /// Adds newly published chapters to a book this crate wrote, and fetches
    /// its placeholder chapters again.
    ///
    /// At most `limit` new chapters are added. The book is rewritten in
    /// place; when the site has nothing new it is not touched at all.
    pub async fn update(
        &self,
        epub: &Path,
        limit: Option<usize>,
    ) -> Result<UpdateSummary, PipelineError> {
        let restored_dir = self.options.asset_directory.join(RESTORED_DIR);
        let document = unpack(epub, &restored_dir)?;
        let (mut novel, mut assets) = restore(&document);

        let scraper = self.scraper_for(&novel.url)?;
        info!(url = %novel.url, scraper = scraper.name(), "updating novel");
        let (fresh, links) = self.read_novel(scraper, &novel.url).await?;
        novel.refresh_info(fresh);

        let before = novel.chapters.len();
        novel.append_chapters(links);
        if let Some(limit) = limit {
            novel.truncate_chapters(before + limit);
        }
        let added = novel.chapters.len() - before;
        let retried = novel.retry_failed();
        info!(added, retried, "chapters to fetch");

        if added + retried == 0 {
            return Ok(UpdateSummary {
                added,
                retried,
                run: None,
            });
        }

        let (report, fetched) = self.fetch_chapters(scraper, &mut novel, &assets).await;
        for (url, asset) in fetched {
            assets.entry(url).or_insert(asset);
        }

        let run = self.finish(novel, assets, report, epub.to_path_buf()).await?;
        Ok(UpdateSummary {
            added,
            retried,
            run: Some(run),
        })
    }

    /// Replaces the cover of a book this crate wrote.
    ///
    /// `cover` is an `http(s)` URL or a path to a local image file.
    pub async fn set_cover(&self, epub: &Path, cover: &str) -> Result<RunSummary, PipelineError> {
        let restored_dir = self.options.asset_directory.join(RESTORED_DIR);
        let document = unpack(epub, &restored_dir)?;
        let (mut novel, mut assets) = restore(&document);

        let pipeline = self.asset_pipeline();
        let lowered = cover.to_ascii_lowercase();
        let asset = if lowered.starts_with("http://") || lowered.starts_with("https://") {
            pipeline.resolve(cover).await?
        } else {
            pipeline.import(Path::new(cover)).await?
        };
        info!(cover = %asset.url, "cover replaced");

        novel.cover_url = Some(asset.url.clone());
        assets.insert(asset.url.clone(), asset);
        self.finish(novel, assets, RunReport::default(), epub.to_path_buf())
            .await
    }

    fn scraper_for(&self, url: &str) -> Result<&'r dyn Scraper, PipelineError> {
        self.registry
            .resolve(url)
            .map_err(PipelineError::UnsupportedSite)
    }

    fn asset_pipeline(&self) -> AssetPipeline {
        AssetPipeline::new(Arc::clone(&self.client), &self.options.asset_directory)
            .with_retry(self.options.retry.clone())
            .with_converter(Arc::new(SniffingConverter {
                max_bytes: self.options.max_image_bytes,
            }))
    }

    /// Fetches every non-terminal chapter of `novel`, then the cover unless
    /// `known` already has it. Returns the images downloaded on the way.
    async fn fetch_chapters(
        &self,
        scraper: &dyn Scraper,
        novel: &mut Novel,
        known: &HashMap<String, Asset>,
    ) -> (RunReport, HashMap<String, Asset>) {
        self.sink.emit(&ProgressEvent::ChaptersDiscovered {
            total: novel.pending_count(),
        });

        let assets = self.options.download_assets.then(|| self.asset_pipeline());

        let mut orchestrator = FetchOrchestrator::new(&self.client, scraper)
            .with_retry(self.options.retry.clone())
            .with_max_concurrent(self.options.max_concurrent)
            .with_tracker(self.tracker.clone())
            .with_cancellation(self.cancellation.clone())
            .with_sink(Arc::clone(&self.sink));
        if let Some(assets) = &assets {
            orchestrator = orchestrator.with_assets(assets);
        }

        let mut report = orchestrator.run(novel).await;

        if let (Some(assets), Some(cover)) = (&assets, novel.cover_url.as_deref())
            && !known.contains_key(cover)
            && let Err(error) = assets.resolve(cover).await
        {
            warn!(url = cover, %error, "cover image dropped");
            self.sink.emit(&ProgressEvent::AssetDropped {
                url: cover.to_string(),
                error: error.to_string(),
            });
            report.asset_failures.push(AssetFailure {
                url: cover.to_string(),
                chapter: None,
                error,
            });
        }

        info!(
            fetched = report.fetched,
            failed = report.chapter_failures.len(),
            dropped_images = report.asset_failures.len(),
            "chapters done"
        );

        (report, assets.map(|a| a.resolved()).unwrap_or_default())
    }

    /// Assembles `novel` and writes it to `path`.
    async fn finish(
        &self,
        mut novel: Novel,
        assets: HashMap<String, Asset>,
        report: RunReport,
        path: PathBuf,
    ) -> Result<RunSummary, PipelineError> {
        if report.cancelled {
            let abandoned = novel.abandon_pending(CANCELLED_REASON);
            info!(abandoned, "packaging partial book");
        }

        let document = assemble(&novel, &assets)?;

        let packager = Arc::clone(&self.packager);
        let (document, written) = tokio::task::spawn_blocking(move || {
            let written = packager.package(&document, &path);
            (document, written)
        })
        .await
        .map_err(|e| PackageError::Task(e.to_string()))?;
        let path = written?;

        self.sink
            .emit(&ProgressEvent::PackageWritten { path: path.clone() });

        Ok(RunSummary {
            path,
            document,
            report,
        })
    }

    /// Reads metadata and the chapter list. Any failure here is fatal.
    async fn read_novel(
        &self,
        scraper: &dyn Scraper,
        url: &str,
    ) -> Result<(Novel, Vec<ChapterLink>), PipelineError> {
        let metadata_error = |reason: String| PipelineError::NovelMetadata {
            url: url.to_string(),
            reason,
        };

        let landing = self
            .fetch_page(url, &FetchOptions::default())
            .await
            .map_err(&metadata_error)?;
        let info = scraper
            .parse_novel_info(&landing)
            .map_err(|e| metadata_error(e.to_string()))?;

        let mut novel = Novel::new(url, scraper.name(), info);
        novel.cover_url = self
            .options
            .cover_url
            .clone()
            .or_else(|| scraper.parse_cover_image(&landing, url));
        self.sink.emit(&ProgressEvent::NovelResolved {
            title: novel.title.clone(),
            site: novel.site.clone(),
        });

        let source = scraper
            .chapter_list_source(url, &landing)
            .map_err(|e| metadata_error(e.to_string()))?;
        let list_html = match source {
            ChapterListSource::Landing => landing,
            ChapterListSource::Page(page) => self
                .fetch_page(&page, &FetchOptions::default())
                .await
                .map_err(&metadata_error)?,
            ChapterListSource::Form { url: target, fields } => self
                .fetch_page(&target, &FetchOptions::form(fields))
                .await
                .map_err(&metadata_error)?,
        };

        let links = scraper
            .parse_chapter_list(&list_html, url)
            .map_err(|e| metadata_error(e.to_string()))?;
        Ok((novel, links))
    }

    async fn fetch_page(&self, url: &str, options: &FetchOptions) -> Result<String, String> {
        self.options
            .retry
            .fetch(&self.client, url, options, |_| {})
            .await
            .into_response()
            .map(|response| response.text())
            .map_err(|e| e.to_string())
    }
}
