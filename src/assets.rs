//! Image download, conversion and storage.
//!
//! [`AssetPipeline::resolve`] is idempotent per URL. The first caller for a
//! URL downloads it; concurrent callers for the same URL wait on the same
//! [`OnceCell`] and get a clone of the result, so every image is fetched at
//! most once per run no matter how many chapters embed it.

use crate::error::AssetError;
use crate::http::{FetchOptions, HttpClient};
use crate::model::Asset;
use crate::retry::RetryPolicy;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Default ceiling on stored image size.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Image bytes ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub bytes: Vec<u8>,
    /// An EPUB core media type.
    pub media_type: String,
    /// Describes what changed, if anything.
    pub note: Option<String>,
}

/// Turns downloaded bytes into something an EPUB reader can display.
pub trait ImageConverter: Send + Sync {
    fn convert(
        &self,
        url: &str,
        bytes: Vec<u8>,
        declared_type: Option<&str>,
    ) -> Result<Converted, String>;
}

/// Identifies the format from magic bytes and normalizes the media type.
///
/// Payloads that are not a known image format (HTML error pages served with
/// status 200, for instance) and oversize images are rejected.
#[derive(Debug, Clone, Copy)]
pub struct SniffingConverter {
    pub max_bytes: u64,
}

impl Default for SniffingConverter {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Media type for the image format the bytes start with.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if (head.starts_with("<?xml") || head.starts_with("<svg")) && head.contains("<svg") {
            Some("image/svg+xml")
        } else {
            None
        }
    }
}

/// File extension used when storing an image of `media_type`.
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}

impl ImageConverter for SniffingConverter {
    fn convert(
        &self,
        _url: &str,
        bytes: Vec<u8>,
        declared_type: Option<&str>,
    ) -> Result<Converted, String> {
        if bytes.is_empty() {
            return Err("empty response body".to_string());
        }
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if size > self.max_bytes {
            return Err(format!(
                "image is {} bytes, limit is {}",
                size, self.max_bytes
            ));
        }

        let media_type = sniff_media_type(&bytes).ok_or_else(|| {
            format!(
                "unrecognized image data (declared {})",
                declared_type.unwrap_or("nothing")
            )
        })?;

        let declared = declared_type
            .and_then(|t| t.split(';').next())
            .map(|t| t.trim().to_ascii_lowercase());
        let note = match declared {
            Some(declared) if declared != media_type => {
                Some(format!("declared {}, stored as {}", declared, media_type))
            }
            _ => None,
        };

        Ok(Converted {
            bytes,
            media_type: media_type.to_string(),
            note,
        })
    }
}

type AssetCell = Arc<OnceCell<Result<Asset, AssetError>>>;

/// Memoizing, coalescing image downloader.
pub struct AssetPipeline {
    client: Arc<HttpClient>,
    retry: RetryPolicy,
    directory: PathBuf,
    converter: Arc<dyn ImageConverter>,
    cells: DashMap<String, AssetCell>,
    counter: AtomicUsize,
}

impl AssetPipeline {
    /// Stores images under `directory`, which is created on first use.
    pub fn new(client: Arc<HttpClient>, directory: impl Into<PathBuf>) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            directory: directory.into(),
            converter: Arc::new(SniffingConverter::default()),
            cells: DashMap::new(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn ImageConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Downloads, converts and stores `url` once; later calls reuse the result.
    pub async fn resolve(&self, url: &str) -> Result<Asset, AssetError> {
        let cell = self
            .cells
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| self.download(url)).await.clone()
    }

    /// Every asset resolved successfully so far, keyed by URL.
    pub fn resolved(&self) -> HashMap<String, Asset> {
        self.cells
            .iter()
            .filter_map(|entry| match entry.value().get() {
                Some(Ok(asset)) => Some((entry.key().clone(), asset.clone())),
                _ => None,
            })
            .collect()
    }

    async fn download(&self, url: &str) -> Result<Asset, AssetError> {
        debug!(url, "downloading image");
        let response = self
            .retry
            .fetch(&self.client, url, &FetchOptions::default(), |_| {})
            .await
            .into_response()?;

        let converted = self
            .converter
            .convert(url, response.body, response.content_type.as_deref())
            .map_err(|reason| {
                warn!(url, %reason, "image rejected");
                AssetError::Conversion {
                    url: url.to_string(),
                    reason,
                }
            })?;

        self.store(url, converted).await
    }

    /// Reads a local image file through the converter and stores it like a
    /// download. The asset's URL is the file path.
    pub async fn import(&self, path: &Path) -> Result<Asset, AssetError> {
        let url = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AssetError::Storage {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        let converted = self
            .converter
            .convert(&url, bytes, None)
            .map_err(|reason| AssetError::Conversion {
                url: url.clone(),
                reason,
            })?;
        self.store(&url, converted).await
    }

    async fn store(&self, url: &str, converted: Converted) -> Result<Asset, AssetError> {
        let storage = |e: std::io::Error| AssetError::Storage {
            url: url.to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(storage)?;

        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.directory.join(format!(
            "image{:03}.{}",
            index,
            extension_for(&converted.media_type)
        ));
        tokio::fs::write(&path, &converted.bytes)
            .await
            .map_err(storage)?;

        Ok(Asset {
            url: url.to_string(),
            local_path: path,
            media_type: converted.media_type,
            converted: converted.note,
            size: u64::try_from(converted.bytes.len()).unwrap_or(u64::MAX),
        })
    }
}
