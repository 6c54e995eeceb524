//! Turns a finished [`Novel`] into a packageable [`Document`].
//!
//! Every chapter gets a section, in ordinal order. Chapters that failed are
//! rendered as placeholders so the book keeps all of its slots; images that
//! never made it to disk are removed from the bodies.

use crate::assets::extension_for;
use crate::error::AssembleError;
use crate::model::{Asset, Chapter, ChapterStatus, Novel, NovelInfo, NovelStatus};
use crate::scrapers::html::{ImageRewrite, escape_xml, rewrite_images};
use crate::utils::utc_timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Text shown in place of a chapter that could not be fetched.
pub const UNAVAILABLE_MARKER: &str = "Content unavailable";

/// Book-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub identifier: String,
    pub title: String,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub source_url: String,
    pub site: String,
    pub status: NovelStatus,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub language: String,
    /// UTC timestamp of assembly, `YYYY-MM-DDTHH:MM:SSZ`.
    pub modified: String,
}

/// One chapter slot of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub ordinal: u32,
    pub id: String,
    pub href: String,
    pub title: String,
    pub source_url: String,
    /// XHTML fragment placed inside `<body>`.
    pub body: String,
    /// The chapter failed and `body` only carries the marker.
    pub placeholder: bool,
    /// Ids of the assets the body references.
    pub images: Vec<String>,
}

/// A packaged image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAsset {
    pub id: String,
    /// Path inside the content directory.
    pub href: String,
    pub media_type: String,
    pub source_url: String,
    /// Where the bytes are on disk. Not part of the manifest.
    #[serde(skip)]
    pub local_path: PathBuf,
    pub cover: bool,
}

/// Everything the packager needs, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub metadata: BookMetadata,
    pub sections: Vec<Section>,
    pub assets: Vec<DocumentAsset>,
}

impl Document {
    pub fn cover(&self) -> Option<&DocumentAsset> {
        self.assets.iter().find(|a| a.cover)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.placeholder)
    }

    pub fn asset(&self, id: &str) -> Option<&DocumentAsset> {
        self.assets.iter().find(|a| a.id == id)
    }
}

/// Assets in first-reference order, deduplicated by source URL.
#[derive(Default)]
struct AssetIndex {
    by_url: HashMap<String, usize>,
    assets: Vec<DocumentAsset>,
}

impl AssetIndex {
    fn add(&mut self, asset: &Asset, cover: bool) -> &DocumentAsset {
        let index = match self.by_url.get(&asset.url) {
            Some(index) => *index,
            None => {
                let index = self.assets.len();
                let id = format!("image{:03}", index);
                self.assets.push(DocumentAsset {
                    href: format!("images/{}.{}", id, extension_for(&asset.media_type)),
                    id,
                    media_type: asset.media_type.clone(),
                    source_url: asset.url.clone(),
                    local_path: asset.local_path.clone(),
                    cover,
                });
                self.by_url.insert(asset.url.clone(), index);
                index
            }
        };
        &self.assets[index]
    }
}

/// Builds the document for `novel` using the images in `assets` (keyed by URL).
///
/// Fails if any chapter is still pending or in flight, or if ordinals are
/// not 1..=n.
pub fn assemble(novel: &Novel, assets: &HashMap<String, Asset>) -> Result<Document, AssembleError> {
    let unfinished = novel
        .chapters
        .iter()
        .filter(|c| !c.status.is_terminal())
        .count();
    if unfinished > 0 {
        return Err(AssembleError::ChaptersPending { count: unfinished });
    }
    if !novel.ordinals_contiguous() {
        return Err(AssembleError::NonContiguousOrdinals);
    }

    let mut index = AssetIndex::default();
    if let Some(cover) = novel.cover_url.as_deref().and_then(|url| assets.get(url)) {
        index.add(cover, true);
    }

    let mut chapters: Vec<_> = novel.chapters.iter().collect();
    chapters.sort_by_key(|c| c.ordinal);

    let mut sections = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let id = format!("ch{:05}", chapter.ordinal);
        let href = format!("{}.xhtml", id);

        let (body, images, placeholder) = match (&chapter.status, &chapter.content) {
            (ChapterStatus::Fetched, Some(content)) => {
                let mut images: Vec<String> = Vec::new();
                let body = rewrite_images(content, &mut |src| match assets.get(src) {
                    Some(asset) => {
                        let entry = index.add(asset, false);
                        if !images.contains(&entry.id) {
                            images.push(entry.id.clone());
                        }
                        ImageRewrite::Src(entry.href.clone())
                    }
                    None => ImageRewrite::Drop,
                });
                (body, images, false)
            }
            _ => (placeholder_body(&chapter.url), Vec::new(), true),
        };

        sections.push(Section {
            ordinal: chapter.ordinal,
            id,
            href,
            title: chapter.title.clone(),
            source_url: chapter.url.clone(),
            body,
            placeholder,
            images,
        });
    }

    debug!(
        sections = sections.len(),
        assets = index.assets.len(),
        "document assembled"
    );

    Ok(Document {
        metadata: BookMetadata {
            identifier: format!("urn:webshelf:{}", novel.url),
            title: novel.title.clone(),
            author: novel.author.clone(),
            summary: novel.summary.clone(),
            source_url: novel.url.clone(),
            site: novel.site.clone(),
            status: novel.status,
            genres: novel.genres.clone(),
            tags: novel.tags.clone(),
            language: "en".to_string(),
            modified: utc_timestamp(Utc::now()),
        },
        sections,
        assets: index.assets,
    })
}

/// Rebuilds the novel a packaged [`Document`] was made from.
///
/// Image `src` attributes go back to their source URLs and the returned map
/// points those URLs at `local_path`, so [`assemble`] gives the same book
/// again. Placeholder sections come back as failed chapters.
pub fn restore(document: &Document) -> (Novel, HashMap<String, Asset>) {
    let meta = &document.metadata;
    let mut novel = Novel::new(
        meta.source_url.clone(),
        meta.site.clone(),
        NovelInfo {
            title: meta.title.clone(),
            author: meta.author.clone(),
            summary: meta.summary.clone(),
            status: meta.status,
            genres: meta.genres.clone(),
            tags: meta.tags.clone(),
        },
    );
    novel.cover_url = document.cover().map(|c| c.source_url.clone());

    let by_href: HashMap<&str, &str> = document
        .assets
        .iter()
        .map(|a| (a.href.as_str(), a.source_url.as_str()))
        .collect();

    for section in &document.sections {
        let mut chapter = Chapter::new(section.ordinal, &section.title, &section.source_url);
        if section.placeholder {
            chapter.status = ChapterStatus::Failed;
            chapter.error = Some("unavailable when the book was last built".to_string());
        } else {
            let mut urls = Vec::new();
            let body = rewrite_images(&section.body, &mut |src| match by_href.get(src) {
                Some(url) => {
                    if !urls.iter().any(|u| u == url) {
                        urls.push(url.to_string());
                    }
                    ImageRewrite::Src(url.to_string())
                }
                None => ImageRewrite::Drop,
            });
            chapter.content = Some(body);
            chapter.assets = urls;
            chapter.status = ChapterStatus::Fetched;
        }
        novel.chapters.push(chapter);
    }
    novel.chapters.sort_by_key(|c| c.ordinal);

    let assets = document
        .assets
        .iter()
        .map(|a| {
            let asset = Asset {
                url: a.source_url.clone(),
                local_path: a.local_path.clone(),
                media_type: a.media_type.clone(),
                converted: None,
                size: std::fs::metadata(&a.local_path).map_or(0, |m| m.len()),
            };
            (a.source_url.clone(), asset)
        })
        .collect();

    (novel, assets)
}

fn placeholder_body(source_url: &str) -> String {
    let url = escape_xml(source_url);
    format!(
        "<p class=\"unavailable\">{}</p><p class=\"source\"><a href=\"{}\">{}</a></p>",
        UNAVAILABLE_MARKER, url, url
    )
}
