//! Document sink port (driven/secondary port)
//!
//! The walker produces a stream of [`Emission`]s; whatever indexes them
//! implements [`IDocumentSink`]. Every emission is a document, an optional
//! lazy content fetch and an operation tag.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific.
//! - Content is fetched lazily: the sink decides whether the document changed
//!   enough to justify a download, then calls [`ContentFetch::fetch`] with
//!   `doit = true`.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ResourceNode;

// ============================================================================
// Operation
// ============================================================================

/// What the sink should do with an emitted document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert or replace the document
    Index,
    /// Remove the document (tombstone from an incremental run)
    Delete,
}

impl Operation {
    /// Lowercase name, as used in bulk requests
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Delete => "delete",
        }
    }
}

// ============================================================================
// ContentDocument / ContentFetch
// ============================================================================

/// Result of a content download
///
/// Exactly one of `attachment` (base64 payload) or `body` (extracted text)
/// is normally set; an empty `body` is kept because it is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDocument {
    /// `_id` of the document this content belongs to
    #[serde(rename = "_id")]
    pub id: String,
    /// Timestamp to store alongside the content
    #[serde(rename = "_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Base64-encoded file payload
    #[serde(rename = "_attachment", skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    /// Extracted text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ContentDocument {
    /// Copies content fields into an emitted document
    pub fn merge_into(&self, document: &mut Value) {
        let Value::Object(map) = document else {
            return;
        };
        if let Some(ts) = &self.timestamp {
            map.insert("_timestamp".to_string(), Value::String(ts.clone()));
        }
        if let Some(attachment) = &self.attachment {
            map.insert("_attachment".to_string(), Value::String(attachment.clone()));
        }
        if let Some(body) = &self.body {
            map.insert("body".to_string(), Value::String(body.clone()));
        }
    }
}

/// Deferred content download attached to an emission
#[async_trait]
pub trait ContentFetch: Send + Sync {
    /// Downloads the content when `doit` is true
    ///
    /// Returns `Ok(None)` when `doit` is false or when policy decides the
    /// content must not be downloaded after all.
    async fn fetch(&self, doit: bool) -> Result<Option<ContentDocument>>;
}

// ============================================================================
// Emission
// ============================================================================

/// One item of the walker's output stream
pub struct Emission {
    /// The document metadata
    pub node: ResourceNode,
    /// Lazy content download, when the node has downloadable content
    pub content: Option<Box<dyn ContentFetch>>,
    /// Upsert or delete
    pub operation: Operation,
}

impl Emission {
    /// An upsert without content
    pub fn index(node: ResourceNode) -> Self {
        Self {
            node,
            content: None,
            operation: Operation::Index,
        }
    }

    /// Attaches a lazy content fetch
    #[must_use]
    pub fn with_content(mut self, content: Option<Box<dyn ContentFetch>>) -> Self {
        self.content = content;
        self
    }

    /// Overrides the operation
    #[must_use]
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }
}

impl fmt::Debug for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emission")
            .field("node", &self.node)
            .field("has_content", &self.content.is_some())
            .field("operation", &self.operation)
            .finish()
    }
}

// ============================================================================
// IDocumentSink
// ============================================================================

/// Destination of the walker's output
#[async_trait]
pub trait IDocumentSink: Send {
    /// Accepts one emission; called in stream order
    async fn accept(&mut self, emission: Emission) -> Result<()>;

    /// Flushes buffered work at the end of a run
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
