//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the opaque strings the remote API hands out.
//! Each newtype ensures data validity at construction time.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// DeltaLink
// ============================================================================

/// Opaque continuation URL returned by the Graph delta API
///
/// Following a delta link resumes listing changes from the point where the
/// previous traversal stopped. The link is treated as an opaque URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeltaLink(String);

impl DeltaLink {
    /// Create a new DeltaLink
    ///
    /// # Errors
    /// Returns error if the link is empty
    pub fn new(link: String) -> Result<Self, DomainError> {
        if link.trim().is_empty() {
            return Err(DomainError::InvalidDeltaLink(
                "Delta link cannot be empty".to_string(),
            ));
        }

        Ok(Self(link))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeltaLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeltaLink {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DeltaLink {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DeltaLink> for String {
    fn from(link: DeltaLink) -> Self {
        link.0
    }
}

// ============================================================================
// Principal
// ============================================================================

/// Identifier of a user or group allowed to see a document
///
/// A login name, an email address or a SharePoint group title. Principals
/// are compared verbatim; no case folding is applied because the index
/// matches them verbatim too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Create a new Principal
    ///
    /// # Errors
    /// Returns error if the identifier is blank
    pub fn new(identity: String) -> Result<Self, DomainError> {
        if identity.trim().is_empty() {
            return Err(DomainError::InvalidPrincipal(
                "Principal cannot be blank".to_string(),
            ));
        }
        Ok(Self(identity))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Principal {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Principal {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.0
    }
}

/// Effective set of principals attached to a node.
///
/// Ordered so that emitted documents are deterministic across runs.
pub type AccessControl = BTreeSet<Principal>;
