//! spindex Core - domain types and ports
//!
//! This crate contains the pieces of the connector that do not talk to the
//! network:
//! - **Domain types** - `ResourceNode`, `NodeKind`, `Principal`, `SyncCursor`
//! - **Configuration** - YAML-backed [`config::Config`] with validation
//! - **Filtering** - advanced sync rules supplied by the operator
//! - **Port definitions** - `IDocumentSink`, `ContentFetch`, `ITextExtractor`
//!
//! # Architecture
//!
//! Adapter crates (`spindex-graph`, `spindex-sync`) depend on this crate;
//! it never depends on them. Ports are traits whose implementations live in
//! the adapters or in the binary.

pub mod config;
pub mod domain;
pub mod filtering;
pub mod ports;
