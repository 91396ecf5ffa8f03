//! Spindex Graph - Microsoft Graph and SharePoint REST API client
//!
//! Provides the async calling layer used by the site walker:
//! - Client-credentials token acquisition and caching for both APIs
//! - A concurrency-bounded, throttling-aware session per API
//! - Paginated and delta-link traversal
//! - Typed endpoint helpers for the SharePoint Online resource tree
//!
//! ## Modules
//!
//! - [`wait`] - Interruptible sleep shared by every backoff path
//! - [`token`] - Bearer token cache and the two token fetchers
//! - [`rate_limit`] - `Retry-After` parsing and the throttling policy
//! - [`session`] - Bounded, retrying API session (single fetch, pages, bytes)
//! - [`delta`] - Delta query response types
//! - [`endpoints`] - Base URLs and tenant checks
//! - [`client`] - SharePoint Online endpoint catalogue
//! - [`retry`] - Generic retry executor for idempotent remote calls

pub mod client;
pub mod delta;
pub mod endpoints;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod token;
pub mod wait;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when communicating with the Graph or REST APIs
#[derive(Debug, Error)]
pub enum GraphError {
    /// A bearer token could not be obtained
    #[error("Error while generating token: {0}")]
    TokenFetchFailed(String),

    /// The app lacks the scopes or admin consent required for a call (401/403)
    #[error("Received Unauthorized response for {url}.\nVerify that Graph API [Sites.Read.All, Files.Read All] and Sharepoint [Sites.Read.All] permissions are granted to the app and admin consent is given. If the permissions and consent are correct, wait for several minutes and try again.")]
    PermissionsMissing {
        /// URL that was rejected
        url: String,
    },

    /// The requested resource does not exist (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The remote service failed (500)
    #[error("Internal server error from {0}")]
    InternalServerError(String),

    /// Throttled on every attempt of the retry budget (429/503)
    #[error("Throttled by {url} with status {status} after {attempts} attempts")]
    Throttled {
        /// URL that kept being throttled
        url: String,
        /// Last throttling status
        status: u16,
        /// Attempts made
        attempts: u32,
    },

    /// Any other unsuccessful status
    #[error("Unexpected status {status} from {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// A REST URL points at a different tenant than the configured one
    #[error("Could not find SharePoint tenant: {expected}, found tenant in {url}")]
    InvalidTenant {
        /// Configured tenant name
        expected: String,
        /// Offending URL
        url: String,
    },

    /// The call was abandoned because the run is shutting down
    #[error("Operation cancelled")]
    Cancelled,

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Writing a downloaded body failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GraphError {
    /// Translates an unsuccessful, non-throttling status into an error
    pub fn from_status(status: StatusCode, url: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::PermissionsMissing {
                url: url.to_string(),
            },
            404 => Self::NotFound(url.to_string()),
            500 => Self::InternalServerError(url.to_string()),
            other => Self::Status {
                status: other,
                url: url.to_string(),
            },
        }
    }

    /// Whether callers that read "missing" as "empty" may swallow this error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
