//! Advanced sync rules
//!
//! Operators may attach a small JSON object to a sync to tune what is
//! downloaded. Only one option is recognised:
//!
//! ```json
//! { "dontSubextractDriveItemsOlderThan": 30 }
//! ```
//!
//! Drive items last modified more than that many days ago are still emitted,
//! but their content is not downloaded. `0` turns the limit off. Negative
//! values are rejected at validation time since no item can be modified in
//! the future.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ValidationError;

/// Name of the only recognised option, as it appears in the rules object.
pub const MAX_AGE_RULE: &str = "dontSubextractDriveItemsOlderThan";

/// Parsed advanced rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvancedRules {
    /// Maximum age in days of drive items whose content is downloaded
    #[serde(
        rename = "dontSubextractDriveItemsOlderThan",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dont_subextract_drive_items_older_than: Option<u32>,
}

impl AdvancedRules {
    /// Validates and parses a raw rules object
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming the accepted schema when the
    /// object has unknown keys or a value of the wrong type.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value.clone()).map_err(|e| ValidationError {
            field: "filtering.advanced_rules".into(),
            message: format!(
                "{e}. Make sure advanced filtering rules follow the following schema: \
                 {{\"{MAX_AGE_RULE}\": <integer, days>}}"
            ),
        })
    }

    /// Maximum drive item age in days, if the rule is set to a positive value
    pub fn max_drive_item_age_days(&self) -> Option<u32> {
        self.dont_subextract_drive_items_older_than.filter(|days| *days > 0)
    }
}
