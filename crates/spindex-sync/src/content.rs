//! Content download policy and lazy content fetchers
//!
//! The walker never downloads anything itself. For each drive item it asks
//! [`DownloadPolicy`] whether content is worth fetching and, if so, attaches
//! a [`ContentFetch`] that the sink may invoke later. List item attachments
//! always get a fetcher because their size is unknown up front.
//!
//! ## Download flow
//!
//! 1. Stream the remote body into a temporary file named after the original
//!    file's extension
//! 2. With text extraction enabled, hand the file to the [`ITextExtractor`]
//!    and keep only the text (`body`)
//! 3. Otherwise base64-encode the file into `_attachment`
//!
//! The temporary file is removed when the fetch completes, whatever the
//! outcome.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, SecondsFormat, Utc};
use spindex_core::domain::ResourceNode;
use spindex_core::ports::{ContentDocument, ContentFetch, ITextExtractor};
use spindex_graph::client::SharepointClient;
use tracing::debug;

/// Largest document downloaded when no text extraction service is used
pub const MAX_DOCUMENT_SIZE: u64 = 10_485_760;

/// Remote field carrying the pre-authenticated download URL
pub const DOWNLOAD_URL_FIELD: &str = "@microsoft.graph.downloadUrl";

/// Timestamp layout used by the Graph API
const GRAPH_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ============================================================================
// DownloadPolicy
// ============================================================================

/// Why a drive item's content is not downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The item has no download URL (folders, notebooks, deleted items)
    NoDownloadUrl,
    /// The item has no last-modified timestamp
    NoTimestamp,
    /// The timestamp could not be parsed while an age limit is active
    InvalidTimestamp,
    /// Last modified before the configured age limit
    TooOld,
    /// Larger than [`MAX_DOCUMENT_SIZE`] without text extraction
    TooLarge,
}

/// Decides whether drive item content is downloaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadPolicy {
    /// Items last modified more than this many days ago are not downloaded;
    /// `Some(0)` disables the limit like `None`
    pub max_age_days: Option<u32>,
    /// Whether content goes through the text extraction service
    pub extraction_enabled: bool,
}

impl DownloadPolicy {
    /// Returns the reason a drive item is skipped, or `None` to download it
    ///
    /// # Arguments
    /// * `item` - Drive item node as listed by the delta query
    /// * `now` - Reference time for the age limit
    pub fn skip_reason(&self, item: &ResourceNode, now: DateTime<Utc>) -> Option<SkipReason> {
        if !item.fields().contains_key(DOWNLOAD_URL_FIELD) {
            return Some(SkipReason::NoDownloadUrl);
        }
        let Some(modified) = item.str_field("lastModifiedDateTime") else {
            return Some(SkipReason::NoTimestamp);
        };

        if let Some(days) = self.max_age_days.filter(|days| *days > 0) {
            let Some(modified) = parse_timestamp(modified) else {
                return Some(SkipReason::InvalidTimestamp);
            };
            if modified < now - ChronoDuration::days(i64::from(days)) {
                return Some(SkipReason::TooOld);
            }
        }

        if item_size(item) > MAX_DOCUMENT_SIZE && !self.extraction_enabled {
            return Some(SkipReason::TooLarge);
        }
        None
    }
}

/// Size field of a drive item, 0 when absent
pub fn item_size(item: &ResourceNode) -> u64 {
    item.fields()
        .get("size")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, GRAPH_TIMESTAMP_FORMAT)
                .ok()
                .map(|ts| ts.and_utc())
        })
}

// ============================================================================
// ContentDownloader
// ============================================================================

/// What to download
#[derive(Debug, Clone, Copy)]
enum Source<'a> {
    DriveItem { drive_id: &'a str, item_id: &'a str },
    Attachment { odata_id: &'a str },
}

/// Downloaded content, already encoded for the index
#[derive(Debug, Default)]
struct Payload {
    attachment: Option<String>,
    body: Option<String>,
}

/// Downloads content into temporary files and encodes it
pub struct ContentDownloader {
    client: Arc<SharepointClient>,
    extraction_enabled: bool,
    extractor: Option<Arc<dyn ITextExtractor>>,
}

impl ContentDownloader {
    /// Creates a downloader; `extraction_enabled` mirrors
    /// `sync.use_text_extraction_service`
    pub fn new(client: Arc<SharepointClient>, extraction_enabled: bool) -> Self {
        Self {
            client,
            extraction_enabled,
            extractor: None,
        }
    }

    /// Sets the text extractor used when extraction is enabled
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ITextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Whether content goes through text extraction
    pub fn extraction_enabled(&self) -> bool {
        self.extraction_enabled
    }

    async fn download(&self, source: Source<'_>, original_filename: &str) -> Result<Payload> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("spindex-");
        let suffix = Path::new(original_filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        builder.suffix(&suffix);

        let (file, path) = builder
            .tempfile()
            .context("Failed to create temporary download file")?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let bytes = match source {
            Source::DriveItem { drive_id, item_id } => {
                self.client
                    .download_drive_item(drive_id, item_id, &mut file)
                    .await
            }
            Source::Attachment { odata_id } => {
                self.client.download_attachment(odata_id, &mut file).await
            }
        }
        .with_context(|| format!("Failed to download {original_filename}"))?;
        drop(file);
        debug!(file = original_filename, bytes, "Downloaded content");

        if self.extraction_enabled {
            let body = match &self.extractor {
                Some(extractor) if extractor.is_configured() => extractor
                    .extract_text(&path, original_filename)
                    .await
                    .with_context(|| format!("Text extraction failed for {original_filename}"))?,
                _ => String::new(),
            };
            return Ok(Payload {
                attachment: None,
                body: Some(body),
            });
        }

        let raw = tokio::fs::read(&path)
            .await
            .context("Failed to read temporary download file")?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        Ok(Payload {
            attachment: (!encoded.is_empty()).then_some(encoded),
            body: None,
        })
    }
}

// ============================================================================
// Lazy fetchers
// ============================================================================

/// Deferred download of a drive item's content
pub struct DriveItemContent {
    downloader: Arc<ContentDownloader>,
    id: String,
    drive_id: String,
    original_filename: String,
    size: u64,
    timestamp: Option<String>,
}

impl DriveItemContent {
    /// Builds the fetcher for a drive item node
    ///
    /// # Arguments
    /// * `drive_id` - Drive the item was listed from; the item's own
    ///   `parentReference.driveId` wins when present
    pub fn new(downloader: Arc<ContentDownloader>, item: &ResourceNode, drive_id: &str) -> Self {
        let drive_id = item
            .fields()
            .get("parentReference")
            .and_then(|parent| parent.get("driveId"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or(drive_id);
        Self {
            downloader,
            id: item.id().to_string(),
            drive_id: drive_id.to_string(),
            original_filename: item.str_field("name").unwrap_or_default().to_string(),
            size: item_size(item),
            timestamp: item.timestamp().map(str::to_string),
        }
    }
}

#[async_trait]
impl ContentFetch for DriveItemContent {
    async fn fetch(&self, doit: bool) -> Result<Option<ContentDocument>> {
        if !doit || self.size == 0 {
            return Ok(None);
        }
        if self.size > MAX_DOCUMENT_SIZE && !self.downloader.extraction_enabled() {
            return Ok(None);
        }

        let payload = self
            .downloader
            .download(
                Source::DriveItem {
                    drive_id: &self.drive_id,
                    item_id: &self.id,
                },
                &self.original_filename,
            )
            .await?;

        Ok(Some(ContentDocument {
            id: self.id.clone(),
            timestamp: self.timestamp.clone(),
            attachment: payload.attachment,
            body: payload.body,
        }))
    }
}

/// Deferred download of a list item attachment
///
/// Attachment metadata never changes when the file is replaced, so every
/// fetch reports a fresh timestamp to force re-indexing.
pub struct AttachmentContent {
    downloader: Arc<ContentDownloader>,
    odata_id: String,
    original_filename: String,
}

impl AttachmentContent {
    pub fn new(downloader: Arc<ContentDownloader>, odata_id: &str, original_filename: &str) -> Self {
        Self {
            downloader,
            odata_id: odata_id.to_string(),
            original_filename: original_filename.to_string(),
        }
    }
}

#[async_trait]
impl ContentFetch for AttachmentContent {
    async fn fetch(&self, doit: bool) -> Result<Option<ContentDocument>> {
        if !doit {
            return Ok(None);
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let payload = self
            .downloader
            .download(
                Source::Attachment {
                    odata_id: &self.odata_id,
                },
                &self.original_filename,
            )
            .await?;

        Ok(Some(ContentDocument {
            id: self.odata_id.clone(),
            timestamp: Some(timestamp),
            attachment: payload.attachment,
            body: payload.body,
        }))
    }
}
