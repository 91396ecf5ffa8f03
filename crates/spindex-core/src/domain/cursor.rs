//! Sync cursor for incremental runs
//!
//! The cursor maps a drive identifier to the delta link the Graph API handed
//! out after that drive's items were last fully drained. It is opaque to the
//! caller: the walker returns it at the end of a run, the caller persists it
//! and hands it back on the next incremental run.
//!
//! Persisted shape:
//!
//! ```json
//! { "site_drives": { "<drive id>": "<delta link>" } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DomainError;
use super::newtypes::DeltaLink;

/// Per-drive delta link store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    #[serde(default)]
    site_drives: BTreeMap<String, DeltaLink>,
}

impl SyncCursor {
    /// Creates an empty cursor, as at the start of a full sync
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a persisted cursor blob
    ///
    /// `null` and `{}` mean "no cursor": there is nothing an incremental run
    /// could resume from.
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidCursor`] when the blob has the wrong shape.
    pub fn from_value(value: Value) -> Result<Option<Self>, DomainError> {
        match &value {
            Value::Null => return Ok(None),
            Value::Object(map) if map.is_empty() => return Ok(None),
            _ => {}
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DomainError::InvalidCursor(e.to_string()))
    }

    /// Encodes the cursor for persistence
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "site_drives": self
                .site_drives
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.as_str().to_string())))
                .collect::<serde_json::Map<_, _>>()
        })
    }

    /// Returns the stored delta link for a drive
    pub fn delta_link(&self, drive_id: &str) -> Option<&DeltaLink> {
        self.site_drives.get(drive_id)
    }

    /// Records a drive's delta link; `None` leaves the previous link in place
    pub fn update(&mut self, drive_id: &str, link: Option<DeltaLink>) {
        if let Some(link) = link {
            self.site_drives.insert(drive_id.to_string(), link);
        }
    }

    /// Number of drives with a stored link
    pub fn len(&self) -> usize {
        self.site_drives.len()
    }

    /// Whether no drive has a stored link
    pub fn is_empty(&self) -> bool {
        self.site_drives.is_empty()
    }
}
