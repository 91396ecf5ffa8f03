//! Domain entities
//!
//! - Newtypes for principals and delta links
//! - The kind-tagged resource node emitted by the walker
//! - The per-drive sync cursor
//! - Domain-specific error types

pub mod cursor;
pub mod errors;
pub mod newtypes;
pub mod node;

pub use cursor::SyncCursor;
pub use errors::DomainError;
pub use newtypes::{AccessControl, DeltaLink, Principal};
pub use node::{NodeKind, ResourceNode, ACCESS_CONTROL_FIELD, DEFAULT_GROUPS};
