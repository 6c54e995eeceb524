//! Canonical in-memory representation of a novel being scraped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Publication status as reported by the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NovelStatus {
    Ongoing,
    Hiatus,
    Dropped,
    Completed,
    #[default]
    Unknown,
}

impl NovelStatus {
    /// Maps a free-form site label ("Completed", "On Hiatus", ...) to a status.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if label.contains("complete") || label.contains("finished") {
            Self::Completed
        } else if label.contains("hiatus") || label.contains("paused") {
            Self::Hiatus
        } else if label.contains("drop") || label.contains("abandon") {
            Self::Dropped
        } else if label.contains("ongoing") || label.contains("publishing") {
            Self::Ongoing
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "Ongoing",
            Self::Hiatus => "Hiatus",
            Self::Dropped => "Dropped",
            Self::Completed => "Completed",
            Self::Unknown => "Unknown",
        }
    }
}

/// Metadata parsed from a novel's landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NovelInfo {
    pub title: String,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub status: NovelStatus,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

/// A chapter as listed on the table of contents, before it is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub title: String,
    pub url: String,
}

impl ChapterLink {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Fetch state of one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChapterStatus {
    Pending,
    Fetching,
    /// Waiting out the backoff after failed attempt `attempt`.
    RetryWait { attempt: u32 },
    Fetched,
    Failed,
}

impl ChapterStatus {
    /// True once the chapter will not change again in this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fetched | Self::Failed)
    }
}

/// One ordered unit of a novel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based reading position.
    pub ordinal: u32,
    pub title: String,
    pub url: String,
    /// Normalized XHTML body; `None` until fetched.
    pub content: Option<String>,
    pub status: ChapterStatus,
    /// Absolute URLs of the images the content embeds.
    pub assets: Vec<String>,
    /// Why the chapter failed, if it did.
    pub error: Option<String>,
}

impl Chapter {
    pub fn new(ordinal: u32, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            ordinal,
            title: title.into(),
            url: url.into(),
            content: None,
            status: ChapterStatus::Pending,
            assets: Vec::new(),
            error: None,
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.status == ChapterStatus::Fetched
    }

    pub fn is_failed(&self) -> bool {
        self.status == ChapterStatus::Failed
    }
}

/// A downloaded embedded resource.
///
/// Chapters reference assets by URL; an `Asset` only exists once the bytes
/// are on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub url: String,
    pub local_path: PathBuf,
    pub media_type: String,
    /// Set when the stored bytes differ from what the server declared.
    pub converted: Option<String>,
    pub size: u64,
}

/// A novel and its chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Novel {
    pub url: String,
    /// Display name of the site adapter.
    pub site: String,
    pub title: String,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub status: NovelStatus,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
    pub chapters: Vec<Chapter>,
}

impl Novel {
    pub fn new(url: impl Into<String>, site: impl Into<String>, info: NovelInfo) -> Self {
        Self {
            url: url.into(),
            site: site.into(),
            title: info.title,
            author: info.author,
            summary: info.summary,
            status: info.status,
            genres: info.genres,
            tags: info.tags,
            cover_url: None,
            chapters: Vec::new(),
        }
    }

    /// Replaces the chapter list with `links`, numbered `1..=n` in order.
    ///
    /// Every link gets a slot, even one whose URL is listed twice.
    pub fn load_chapters(&mut self, links: impl IntoIterator<Item = ChapterLink>) -> usize {
        self.chapters = links
            .into_iter()
            .zip(1..)
            .map(|(link, ordinal)| Chapter::new(ordinal, link.title, link.url))
            .collect();
        self.chapters.len()
    }

    /// Appends chapters after the last ordinal, skipping URLs already present.
    ///
    /// Used when updating a book: the site's current list is merged into the
    /// chapters already packaged. Returns how many chapters were added.
    pub fn append_chapters(&mut self, links: impl IntoIterator<Item = ChapterLink>) -> usize {
        let mut next = self.chapters.last().map_or(1, |c| c.ordinal + 1);
        let mut added = 0;

        for link in links {
            if self.chapters.iter().any(|c| c.url == link.url) {
                continue;
            }
            self.chapters.push(Chapter::new(next, link.title, link.url));
            next += 1;
            added += 1;
        }

        added
    }

    /// Takes metadata from a freshly scraped copy of this novel.
    ///
    /// The cover is only taken when this novel has none.
    pub fn refresh_info(&mut self, fresh: Novel) {
        self.title = fresh.title;
        self.author = fresh.author;
        self.summary = fresh.summary;
        self.status = fresh.status;
        self.genres = fresh.genres;
        self.tags = fresh.tags;
        if self.cover_url.is_none() {
            self.cover_url = fresh.cover_url;
        }
    }

    /// Puts failed chapters back to pending so the next run fetches them again.
    pub fn retry_failed(&mut self) -> usize {
        let mut reset = 0;
        for chapter in self.chapters.iter_mut().filter(|c| c.is_failed()) {
            chapter.status = ChapterStatus::Pending;
            chapter.error = None;
            reset += 1;
        }
        reset
    }

    /// Keeps only the first `limit` chapters.
    pub fn truncate_chapters(&mut self, limit: usize) {
        self.chapters.truncate(limit);
    }

    pub fn chapter(&self, ordinal: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.ordinal == ordinal)
    }

    pub fn chapter_mut(&mut self, ordinal: u32) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.ordinal == ordinal)
    }

    /// Chapters not yet in a terminal state.
    pub fn pending_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| !c.status.is_terminal())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.chapters.iter().filter(|c| c.is_failed()).count()
    }

    /// True when every chapter is fetched or failed.
    pub fn is_ready(&self) -> bool {
        self.pending_count() == 0
    }

    /// Checks that ordinals, taken in any order, are exactly `1..=len`.
    pub fn ordinals_contiguous(&self) -> bool {
        let mut ordinals: Vec<u32> = self.chapters.iter().map(|c| c.ordinal).collect();
        ordinals.sort_unstable();
        ordinals
            .iter()
            .enumerate()
            .all(|(i, ordinal)| usize::try_from(*ordinal).is_ok_and(|o| o == i + 1))
    }

    /// Marks every non-terminal chapter as failed with `reason`.
    ///
    /// Used after a cancelled run so the book can still be assembled with
    /// placeholders. Returns how many chapters were abandoned.
    pub fn abandon_pending(&mut self, reason: &str) -> usize {
        let mut abandoned = 0;
        for chapter in self.chapters.iter_mut().filter(|c| !c.status.is_terminal()) {
            chapter.status = ChapterStatus::Failed;
            chapter.error = Some(reason.to_string());
            abandoned += 1;
        }
        abandoned
    }
}
