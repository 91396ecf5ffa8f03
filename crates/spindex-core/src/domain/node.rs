//! Resource nodes emitted by the site walker
//!
//! Every remote object the connector visits (site collection, site, drive,
//! drive item, list, list item, attachment, page) becomes a [`ResourceNode`]:
//! a shared set of identity fields plus the raw remote payload, tagged with
//! its [`NodeKind`]. Kind-specific behaviour is dispatched by matching on the
//! kind, never by probing for fields.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::DomainError;
use super::newtypes::{AccessControl, Principal};

/// Document field carrying the effective principal list.
pub const ACCESS_CONTROL_FIELD: &str = "_allow_access_control";

/// Groups that can see every document when access control is enabled.
pub const DEFAULT_GROUPS: [&str; 3] = ["Visitors", "Owners", "Members"];

// ============================================================================
// NodeKind
// ============================================================================

/// Discriminant of a [`ResourceNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Root of a SharePoint tenant's site tree
    SiteCollection,
    /// A site inside a collection
    Site,
    /// A document library
    SiteDrive,
    /// A file or folder inside a document library
    DriveItem,
    /// A SharePoint list
    SiteList,
    /// A row of a SharePoint list
    ListItem,
    /// A file attached to a list row
    ListItemAttachment,
    /// A modern or classic site page
    SitePage,
}

impl NodeKind {
    /// Value written to the `object_type` field of emitted documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SiteCollection => "site_collection",
            Self::Site => "site",
            Self::SiteDrive => "site_drive",
            Self::DriveItem => "drive_item",
            Self::SiteList => "site_list",
            Self::ListItem => "list_item",
            Self::ListItemAttachment => "list_item_attachment",
            Self::SitePage => "site_page",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ResourceNode
// ============================================================================

/// A remote object enriched with identity fields
///
/// `id` is globally stable across runs (list items are namespaced by their
/// list, pages and attachments use their `odata.id`). `access_control` is
/// `None` until the access control resolver decorates the node, and stays
/// `None` when access control is disabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    id: String,
    kind: NodeKind,
    timestamp: Option<String>,
    access_control: Option<AccessControl>,
    fields: Map<String, Value>,
}

impl ResourceNode {
    /// Creates a node from an already-decoded remote payload
    pub fn new(kind: NodeKind, id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp: None,
            access_control: None,
            fields,
        }
    }

    /// Creates a node from a remote JSON value, which must be an object
    ///
    /// # Errors
    /// Returns [`DomainError::ValidationFailed`] for non-object payloads.
    pub fn from_value(
        kind: NodeKind,
        id: impl Into<String>,
        value: Value,
    ) -> Result<Self, DomainError> {
        match value {
            Value::Object(fields) => Ok(Self::new(kind, id, fields)),
            other => Err(DomainError::ValidationFailed(format!(
                "{kind} payload must be a JSON object, got {other}"
            ))),
        }
    }

    /// Sets the last-modified timestamp reported downstream
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Globally stable identifier (`_id`)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Node kind
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Last-modified timestamp, if the remote object has one
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Effective principals, if access control decoration ran
    pub fn access_control(&self) -> Option<&AccessControl> {
        self.access_control.as_ref()
    }

    /// Raw remote payload
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a string field of the remote payload
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns a string field or a [`DomainError::MissingField`]
    ///
    /// # Errors
    /// Fails when the field is absent or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, DomainError> {
        self.str_field(name).ok_or_else(|| DomainError::MissingField {
            kind: self.kind.to_string(),
            field: name.to_string(),
        })
    }

    /// Whether the remote API marked this node as deleted
    pub fn is_deleted(&self) -> bool {
        self.fields.contains_key("deleted")
    }

    /// Overwrites a field of the payload
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Unions principals into the node's access control set
    ///
    /// The first call turns an undecorated node into a decorated one, even
    /// when `principals` is empty.
    pub fn extend_access_control<I>(&mut self, principals: I)
    where
        I: IntoIterator<Item = Principal>,
    {
        self.access_control
            .get_or_insert_with(AccessControl::new)
            .extend(principals);
    }

    /// Renders the document handed to the indexing sink
    pub fn to_document(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("_id".to_string(), Value::String(self.id.clone()));
        doc.insert(
            "object_type".to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        if let Some(ts) = &self.timestamp {
            doc.insert("_timestamp".to_string(), Value::String(ts.clone()));
        }
        if let Some(acl) = &self.access_control {
            doc.insert(
                ACCESS_CONTROL_FIELD.to_string(),
                Value::Array(
                    acl.iter()
                        .map(|p| Value::String(p.as_str().to_string()))
                        .collect(),
                ),
            );
        }
        Value::Object(doc)
    }
}
