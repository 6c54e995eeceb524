//! Progress notifications emitted during a run.

use std::path::PathBuf;
use std::time::Duration;

/// Something observable happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The landing page was parsed.
    NovelResolved { title: String, site: String },
    ChaptersDiscovered { total: usize },
    ChapterStarted { ordinal: u32, title: String },
    ChapterRetrying {
        ordinal: u32,
        attempt: u32,
        delay: Duration,
    },
    ChapterFetched { ordinal: u32 },
    ChapterFailed { ordinal: u32, error: String },
    /// An image was dropped from a chapter.
    AssetDropped { url: String, error: String },
    /// The run stopped scheduling; `remaining` chapters were never started.
    Cancelled { remaining: usize },
    PackageWritten { path: PathBuf },
}

/// Receives progress events. Called from worker tasks, so must be thread-safe.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: &ProgressEvent) {}
}
