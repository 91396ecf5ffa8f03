//! Spindex Sync - site walker and indexing sinks
//!
//! Provides:
//! - Full and incremental traversal of a SharePoint Online tenant
//! - Access control propagation down the resource tree
//! - Lazy content download with size and age policy
//! - Sinks that forward emissions to an index or a JSON-lines file
//!
//! ## Modules
//!
//! - [`walker`] - Lazy, cursor-aware traversal producing [`Emission`](spindex_core::ports::Emission)s
//! - [`access_control`] - Kind-specific principal lookups and the union law
//! - [`content`] - Download policy and lazy content fetchers
//! - [`html`] - Plain-text rendering of page HTML fields
//! - [`connector`] - Wiring from configuration, plus remote validation
//! - [`sink`] - Bulk indexer and JSON-lines sink

pub mod access_control;
pub mod connector;
pub mod content;
pub mod html;
pub mod sink;
pub mod walker;

use spindex_core::domain::errors::DomainError;
use spindex_graph::GraphError;
use thiserror::Error;

/// Message shown when an incremental run has nothing to resume from
pub const CURSOR_EMPTY_MESSAGE: &str =
    "Unable to start incremental sync. Please perform a full sync to re-enable incremental syncs.";

/// Errors that can occur during a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote call failed after the calling layer gave up on it
    #[error("Remote call failed: {0}")]
    Graph(#[from] GraphError),

    /// Incremental sync was requested without a cursor
    #[error("{}", CURSOR_EMPTY_MESSAGE)]
    CursorEmpty,

    /// A remote payload could not be turned into a node
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The connector configuration is unusable against the remote tenant
    #[error("{0}")]
    InvalidConfiguration(String),

    /// The downstream sink rejected an emission
    #[error("Sink error: {0}")]
    Sink(String),
}
