//! webshelf - web novel scraper and EPUB builder.
//!
//! This library provides functionality for:
//! - Fetching pages politely (per-host rate limits, retries, challenge pages)
//! - Parsing novels from supported sites (NovelBin, NovelNext, ScribbleHub, WuxiaWorld.site)
//! - Fetching chapters and images concurrently
//! - Assembling and packaging the result as EPUB 3
//! - Updating and re-covering books it wrote, from their embedded manifest

pub mod assets;
pub mod config;
pub mod console;
mod cookies;
pub mod document;
pub mod epub;
pub mod error;
pub mod events;
pub mod http;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod scrapers;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ScrapeOptions};
pub use console::Console;
pub use cookies::{CookieError, load_cookie_file};
pub use document::{Document, assemble, restore};
pub use epub::{EpubPackager, Packager, read_manifest, unpack};
pub use error::{
    AssembleError, AssetError, ChapterFetchError, ConfigError, FetchError, PackageError,
    PipelineError, ScraperError,
};
pub use events::{ProgressEvent, ProgressSink};
pub use model::{Asset, Chapter, ChapterStatus, Novel, NovelStatus};
pub use orchestrator::{CancellationToken, FetchOrchestrator, RunReport};
pub use pipeline::{RunSummary, ScrapeOutcome, Session, UpdateSummary};
pub use scrapers::{Scraper, ScraperRegistry};
