//! Delta query types for drive item traversal
//!
//! Drive items are always listed through the Graph API `delta` function, so
//! that a full listing ends with a delta link that a later incremental run can
//! resume from:
//!
//! ```text
//! GET /drives/{drive-id}/root/delta?$select=...
//! ```
//!
//! Each response carries a page of items and either an `@odata.nextLink`
//! (more pages follow) or an `@odata.deltaLink` (listing complete).

use serde::Deserialize;
use serde_json::Value;
use spindex_core::domain::DeltaLink;

/// Drive item fields requested from the delta endpoint
pub const DRIVE_ITEMS_FIELDS: &str = "id,content.downloadUrl,lastModifiedDateTime,lastModifiedBy,root,deleted,file,folder,package,name,webUrl,createdBy,createdDateTime,size,parentReference";

// ============================================================================
// Graph API JSON response types
// ============================================================================

/// Top-level response from a delta query
#[derive(Debug, Deserialize)]
pub(crate) struct GraphDeltaResponse {
    /// Drive items in this page
    #[serde(default)]
    pub value: Vec<Value>,

    /// URL for the next page (present when more pages exist)
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,

    /// URL to resume from in the next incremental run (last page only)
    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

// ============================================================================
// DriveItemsPage
// ============================================================================

/// A page of drive items and the most recent delta link seen so far
#[derive(Debug, Clone, PartialEq)]
pub struct DriveItemsPage {
    /// Raw drive items, in server order
    pub items: Vec<Value>,
    /// Latest delta link observed up to and including this page
    pub delta_link: Option<DeltaLink>,
}

/// Builds the initial delta URL of a drive
pub fn drive_delta_url(graph_api_url: &str, drive_id: &str) -> String {
    format!("{graph_api_url}/drives/{drive_id}/root/delta?$select={DRIVE_ITEMS_FIELDS}")
}
