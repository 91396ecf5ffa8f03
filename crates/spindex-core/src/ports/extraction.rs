//! Text extraction port
//!
//! When the operator enables the text extraction service, downloaded files
//! are not base64-encoded into the document; their extracted text is stored
//! in the `body` field instead.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Turns a downloaded file into plain text
#[async_trait]
pub trait ITextExtractor: Send + Sync {
    /// Whether the service is reachable and configured
    ///
    /// An unconfigured extractor yields an empty body instead of an error.
    fn is_configured(&self) -> bool;

    /// Extracts text from the file at `path`
    ///
    /// `original_filename` carries the remote name so the service can pick
    /// a parser by extension.
    async fn extract_text(&self, path: &Path, original_filename: &str) -> Result<String>;
}
