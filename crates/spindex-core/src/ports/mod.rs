//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the connector core depends on while their
//! implementations live elsewhere.
//!
//! ## Ports Overview
//!
//! - [`IDocumentSink`] - Receives emitted documents, deletions and lazy content
//! - [`ITextExtractor`] - Optional side-service turning downloaded files into text

pub mod extraction;
pub mod sink;

pub use extraction::ITextExtractor;
pub use sink::{ContentDocument, ContentFetch, Emission, IDocumentSink, Operation};
