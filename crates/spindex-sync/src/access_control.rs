//! Access control propagation
//!
//! When document level security is enabled every emitted node carries the
//! set of principals allowed to see it:
//!
//! ```text
//! effective = explicit grants on the node ∪ parent's effective set ∪ DEFAULT_GROUPS
//! ```
//!
//! Explicit grants depend on the node kind ([`Grants`]):
//!
//! | Kind              | Source                                              |
//! |-------------------|-----------------------------------------------------|
//! | site collection   | none                                                |
//! | site              | site group titles and site user principal names     |
//! | drive             | none (inherits the site)                            |
//! | drive item        | Graph permission entries                            |
//! | list / list item  | REST role assignments, resolved to users            |
//! | attachment        | none (inherits the list item)                       |
//! | page              | REST role assignments, resolved to users            |
//!
//! With document level security disabled the resolver never calls the
//! remote APIs and leaves nodes undecorated.

use std::sync::Arc;

use serde_json::Value;
use spindex_core::domain::{AccessControl, Principal, ResourceNode, DEFAULT_GROUPS};
use spindex_graph::client::SharepointClient;
use spindex_graph::GraphError;
use tracing::debug;

/// Response shapes a drive item permission may carry its grantee under
const PERMISSION_GRANTEE_FIELDS: [&str; 2] = ["grantedToV2", "grantedTo"];

/// Fields of a resolved SharePoint user, in order of preference
const USER_IDENTITY_FIELDS: [&str; 4] = ["UserPrincipalName", "Email", "LoginName", "Title"];

/// Where the explicit grants of a node come from
#[derive(Debug, Clone, Copy)]
pub enum Grants<'a> {
    /// Nothing beyond the parent's set and the default groups
    Inherited,
    /// Site groups and site users of the site at `web_url`
    Site { web_url: &'a str },
    /// Permission entries of a drive item
    DriveItem { drive_id: &'a str, item_id: &'a str },
    /// Role assignments of a list
    SiteList { web_url: &'a str, list_name: &'a str },
    /// Role assignments of a list item
    ListItem {
        web_url: &'a str,
        list_name: &'a str,
        item_id: &'a str,
    },
    /// Role assignments of a site page
    SitePage { web_url: &'a str, page_id: &'a str },
}

/// The always-visible default groups
pub fn default_principals() -> impl Iterator<Item = Principal> {
    DEFAULT_GROUPS
        .into_iter()
        .filter_map(|group| Principal::new(group.to_string()).ok())
}

// ============================================================================
// AccessControlResolver
// ============================================================================

/// Decorates nodes with their effective principal set
#[derive(Clone)]
pub struct AccessControlResolver {
    client: Arc<SharepointClient>,
    enabled: bool,
}

impl AccessControlResolver {
    /// Creates a resolver; with `enabled == false` every call is a no-op
    pub fn new(client: Arc<SharepointClient>, enabled: bool) -> Self {
        Self { client, enabled }
    }

    /// Unions explicit grants, the parent's set and the default groups into
    /// `node`'s access control
    ///
    /// # Arguments
    /// * `node` - Node to decorate
    /// * `parent` - Effective set of the node's parent, if any
    /// * `grants` - Where the node's explicit grants come from
    ///
    /// # Errors
    /// Propagates lookup failures other than the not-found cases the client
    /// already maps to empty results.
    pub async fn decorate(
        &self,
        node: &mut ResourceNode,
        parent: Option<&AccessControl>,
        grants: Grants<'_>,
    ) -> Result<(), GraphError> {
        if !self.enabled {
            return Ok(());
        }

        let explicit = self.explicit_principals(grants).await?;
        debug!(
            id = node.id(),
            kind = %node.kind(),
            explicit = explicit.len(),
            "Resolved access control"
        );

        node.extend_access_control(explicit);
        if let Some(parent) = parent {
            node.extend_access_control(parent.iter().cloned());
        }
        node.extend_access_control(default_principals());
        Ok(())
    }

    async fn explicit_principals(&self, grants: Grants<'_>) -> Result<Vec<Principal>, GraphError> {
        match grants {
            Grants::Inherited => Ok(Vec::new()),
            Grants::Site { web_url } => {
                let groups = self.client.site_groups(web_url).await?;
                let users = self.client.site_users(web_url).await?;
                Ok(string_fields(&groups, "Title")
                    .chain(string_fields(&users, "UserPrincipalName"))
                    .collect())
            }
            Grants::DriveItem { drive_id, item_id } => {
                let permissions = self.client.drive_item_permissions(drive_id, item_id).await?;
                Ok(principals_from_permissions(&permissions))
            }
            Grants::SiteList { web_url, list_name } => {
                let assignments = self
                    .client
                    .site_list_role_assignments(web_url, list_name)
                    .await?;
                self.resolve_role_assignments(web_url, &assignments).await
            }
            Grants::ListItem {
                web_url,
                list_name,
                item_id,
            } => {
                let assignments = self
                    .client
                    .site_list_item_role_assignments(web_url, list_name, item_id)
                    .await?;
                self.resolve_role_assignments(web_url, &assignments).await
            }
            Grants::SitePage { web_url, page_id } => {
                let assignments = self
                    .client
                    .site_page_role_assignments(web_url, page_id)
                    .await?;
                self.resolve_role_assignments(web_url, &assignments).await
            }
        }
    }

    /// Looks up the principal behind each role assignment, one at a time
    async fn resolve_role_assignments(
        &self,
        web_url: &str,
        assignments: &[Value],
    ) -> Result<Vec<Principal>, GraphError> {
        let mut principals = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let user = self
                .client
                .user_for_role_assignment(web_url, assignment)
                .await?;
            if let Some(principal) = user.as_ref().and_then(principal_from_user) {
                principals.push(principal);
            }
        }
        Ok(principals)
    }
}

// ============================================================================
// Payload interpretation
// ============================================================================

/// Extracts grantees from drive item permission entries
///
/// Each entry may name its grantee under `grantedToV2` and/or `grantedTo`,
/// as a `siteGroup` or a `user`, identified by `loginName` or `email`. Both
/// shapes are read and their grantees unioned.
pub fn principals_from_permissions(permissions: &[Value]) -> Vec<Principal> {
    permissions
        .iter()
        .flat_map(|permission| {
            PERMISSION_GRANTEE_FIELDS
                .iter()
                .filter_map(move |field| permission.get(*field))
        })
        .filter_map(|granted| granted.get("siteGroup").or_else(|| granted.get("user")))
        .filter_map(|grantee| {
            grantee
                .get("loginName")
                .or_else(|| grantee.get("email"))
                .and_then(Value::as_str)
        })
        .filter_map(|identity| Principal::new(identity.to_string()).ok())
        .collect()
}

/// Identity of a resolved SharePoint user
fn principal_from_user(user: &Value) -> Option<Principal> {
    USER_IDENTITY_FIELDS
        .iter()
        .filter_map(|field| user.get(*field).and_then(Value::as_str))
        .find_map(|identity| Principal::new(identity.to_string()).ok())
}

fn string_fields<'a>(values: &'a [Value], field: &'a str) -> impl Iterator<Item = Principal> + 'a {
    values
        .iter()
        .filter_map(move |value| value.get(field).and_then(Value::as_str))
        .filter_map(|identity| Principal::new(identity.to_string()).ok())
}
