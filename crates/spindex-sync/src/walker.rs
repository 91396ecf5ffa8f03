//! Hierarchical site walker
//!
//! The [`SiteWalker`] turns a SharePoint Online tenant into a flat, lazy
//! sequence of [`Emission`]s. Every level is a stream pulled on demand; no
//! level is ever collected in memory.
//!
//! ## Traversal order
//!
//! ```text
//! site collection
//! └── site (allow-listed)
//!     ├── drive
//!     │   └── drive item pages      (cursor updated after each page)
//!     ├── list
//!     │   └── list item
//!     │       └── attachments       (emitted before their list item)
//!     └── site page
//! ```
//!
//! ## Modes
//!
//! - **Full**: starts from an empty cursor, lists every drive from scratch and
//!   records each drive's latest delta link.
//! - **Incremental**: resumes each drive from its stored delta link and
//!   reports deleted drive items as [`Operation::Delete`]. Lists, list items
//!   and pages have no change feed and are re-listed every run.
//!
//! A drive's cursor entry only moves after the page it came with has been
//! fully handed downstream, so an aborted run never skips items on the next
//! incremental run.

use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use futures_util::{pin_mut, Stream, StreamExt};
use serde_json::Value;
use spindex_core::domain::{
    errors::DomainError, AccessControl, NodeKind, ResourceNode, SyncCursor,
};
use spindex_core::ports::{ContentFetch, Emission, Operation};
use spindex_graph::client::SharepointClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access_control::{AccessControlResolver, Grants};
use crate::content::{
    item_size, AttachmentContent, ContentDownloader, DownloadPolicy, DriveItemContent, SkipReason,
};
use crate::html::html_to_text;
use crate::SyncError;

/// List item content types that are never indexed
pub const SKIPPED_CONTENT_TYPES: [&str; 2] =
    ["Web Template Extensions", "Client Side Component Manifests"];

/// Page fields holding HTML that is indexed as plain text
pub const PAGE_HTML_FIELDS: [&str; 2] = ["LayoutWebpartsContent", "CanvasContent1"];

/// Field recording the name of the file behind a document
pub const ORIGINAL_FILENAME_FIELD: &str = "_original_filename";

/// Traversal mode of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Everything, drives listed from scratch
    Full,
    /// Drives resumed from their delta links
    Incremental,
}

/// Settings of a walker that do not come from the remote tenant
#[derive(Debug, Clone)]
pub struct WalkerOptions {
    /// Site names to visit; `*` visits every site
    pub allowed_sites: Vec<String>,
    /// Content download policy for drive items
    pub download_policy: DownloadPolicy,
}

// ============================================================================
// SiteWalker
// ============================================================================

/// Lazy, cursor-aware traversal of a tenant
pub struct SiteWalker {
    client: Arc<SharepointClient>,
    nodes: NodeBuilder,
    allowed_sites: Vec<String>,
    cursor: SyncCursor,
    cancel: CancellationToken,
}

impl SiteWalker {
    /// Creates a walker
    ///
    /// # Arguments
    /// * `access_control` - Resolver used to decorate every node
    /// * `downloader` - Shared by every lazy content fetcher handed out
    /// * `cancel` - Stops the emission streams as soon as it is cancelled
    pub fn new(
        client: Arc<SharepointClient>,
        access_control: AccessControlResolver,
        downloader: Arc<ContentDownloader>,
        options: WalkerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            nodes: NodeBuilder {
                access_control,
                downloader,
                policy: options.download_policy,
            },
            allowed_sites: options.allowed_sites,
            cursor: SyncCursor::new(),
            cancel,
        }
    }

    /// Walks the whole tenant, rebuilding the cursor from scratch
    pub fn full_sync(&mut self) -> impl Stream<Item = Result<Emission, SyncError>> + Send + '_ {
        info!(sites = ?self.allowed_sites, "Starting full sync");
        self.cursor = SyncCursor::new();
        self.walk(SyncMode::Full)
    }

    /// Walks the tenant, resuming drives from `cursor`
    ///
    /// # Errors
    /// Returns [`SyncError::CursorEmpty`] without touching the network when
    /// there is no cursor; a full sync is the only way to obtain one.
    pub fn incremental_sync(
        &mut self,
        cursor: Option<SyncCursor>,
    ) -> Result<impl Stream<Item = Result<Emission, SyncError>> + Send + '_, SyncError> {
        let cursor = cursor.ok_or(SyncError::CursorEmpty)?;
        info!(drives = cursor.len(), "Starting incremental sync");
        self.cursor = cursor;
        Ok(self.walk(SyncMode::Incremental))
    }

    /// Cursor as left by the last run
    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// Consumes the walker, returning the cursor for persistence
    pub fn into_cursor(self) -> SyncCursor {
        self.cursor
    }

    /// Token that stops the walk
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn walk(&mut self, mode: SyncMode) -> impl Stream<Item = Result<Emission, SyncError>> + Send + '_ {
        let stream = emissions(
            Arc::clone(&self.client),
            self.nodes.clone(),
            self.allowed_sites.clone(),
            &mut self.cursor,
            mode,
        );
        stream.take_until(self.cancel.clone().cancelled_owned())
    }
}

fn emissions<'a>(
    client: Arc<SharepointClient>,
    nodes: NodeBuilder,
    allowed_sites: Vec<String>,
    cursor: &'a mut SyncCursor,
    mode: SyncMode,
) -> impl Stream<Item = Result<Emission, SyncError>> + Send + 'a {
    try_stream! {
        let collections = client.site_collections();
        pin_mut!(collections);
        while let Some(collection) = collections.next().await {
            let (collection, hostname) = nodes.site_collection(collection?).await?;
            let collection_acl = collection.access_control().cloned();
            yield Emission::index(collection);

            let sites = client.sites(&hostname, &allowed_sites);
            pin_mut!(sites);
            while let Some(site) = sites.next().await {
                let site = nodes.site(site?, collection_acl.as_ref()).await?;
                let site_id = site.require_str("id")?.to_string();
                let web_url = site.require_str("webUrl")?.to_string();
                let site_acl = site.access_control().cloned();
                debug!(site_id = %site_id, web_url = %web_url, "Visiting site");
                yield Emission::index(site);

                let drives = client.site_drives(&site_id);
                pin_mut!(drives);
                while let Some(drive) = drives.next().await {
                    let drive = nodes.drive(drive?, site_acl.as_ref()).await?;
                    let drive_id = drive.id().to_string();
                    let drive_acl = drive.access_control().cloned();
                    yield Emission::index(drive);

                    let resume_from = match mode {
                        SyncMode::Full => None,
                        SyncMode::Incremental => cursor.delta_link(&drive_id).cloned(),
                    };
                    let pages = client.drive_items(&drive_id, resume_from.as_ref());
                    pin_mut!(pages);
                    while let Some(page) = pages.next().await {
                        let page = page?;
                        for item in page.items {
                            let emission = nodes
                                .drive_item(item, &drive_id, drive_acl.as_ref(), mode)
                                .await?;
                            yield emission;
                        }
                        if page.delta_link.is_some() {
                            debug!(drive_id = %drive_id, "Advancing drive cursor");
                        }
                        cursor.update(&drive_id, page.delta_link);
                    }
                }

                let lists = client.site_lists(&site_id);
                pin_mut!(lists);
                while let Some(list) = lists.next().await {
                    let list = nodes.site_list(list?, &web_url, site_acl.as_ref()).await?;
                    let list_id = list.id().to_string();
                    let list_name = list.require_str("name")?.to_string();
                    let list_acl = list.access_control().cloned();
                    yield Emission::index(list);

                    let items = client.site_list_items(&site_id, &list_id);
                    pin_mut!(items);
                    while let Some(item) = items.next().await {
                        let context = ListContext {
                            list_id: &list_id,
                            list_name: &list_name,
                            web_url: &web_url,
                        };
                        let Some(item) = nodes.list_item(item?, &context, list_acl.as_ref()).await? else {
                            continue;
                        };

                        if has_attachments(&item) {
                            let natural_id = item.require_str("id")?.to_string();
                            let attachments = client
                                .site_list_item_attachments(&web_url, &list_name, &natural_id)
                                .await?;
                            for attachment in attachments {
                                let emission = nodes.attachment(attachment, &item).await?;
                                yield emission;
                            }
                        }
                        yield Emission::index(item);
                    }
                }

                let pages = client.site_pages(&web_url);
                pin_mut!(pages);
                while let Some(page) = pages.next().await {
                    let page = nodes.site_page(page?, &web_url, site_acl.as_ref()).await?;
                    yield Emission::index(page);
                }
            }
        }

        info!(drives = cursor.len(), "Walk complete");
    }
}

fn has_attachments(item: &ResourceNode) -> bool {
    item.fields()
        .get("fields")
        .and_then(|fields| fields.get("Attachments"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// ============================================================================
// NodeBuilder
// ============================================================================

/// Where a list item lives
struct ListContext<'a> {
    list_id: &'a str,
    list_name: &'a str,
    web_url: &'a str,
}

/// Turns remote payloads into decorated nodes
#[derive(Clone)]
struct NodeBuilder {
    access_control: AccessControlResolver,
    downloader: Arc<ContentDownloader>,
    policy: DownloadPolicy,
}

impl NodeBuilder {
    /// Site collection node plus the hostname its sites are listed under
    async fn site_collection(&self, value: Value) -> Result<(ResourceNode, String), SyncError> {
        let web_url = required_str(&value, NodeKind::SiteCollection, "webUrl")?;
        let hostname = value
            .get("siteCollection")
            .and_then(|c| c.get("hostname"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing(NodeKind::SiteCollection, "siteCollection.hostname"))?;

        let mut node = ResourceNode::from_value(NodeKind::SiteCollection, web_url, value)?;
        self.access_control
            .decorate(&mut node, None, Grants::Inherited)
            .await?;
        Ok((node, hostname))
    }

    async fn site(
        &self,
        value: Value,
        parent: Option<&AccessControl>,
    ) -> Result<ResourceNode, SyncError> {
        let id = required_str(&value, NodeKind::Site, "id")?;
        let web_url = required_str(&value, NodeKind::Site, "webUrl")?;
        let mut node = ResourceNode::from_value(NodeKind::Site, id, value)?;
        self.access_control
            .decorate(&mut node, parent, Grants::Site { web_url: &web_url })
            .await?;
        Ok(node)
    }

    async fn drive(
        &self,
        value: Value,
        parent: Option<&AccessControl>,
    ) -> Result<ResourceNode, SyncError> {
        let id = required_str(&value, NodeKind::SiteDrive, "id")?;
        let mut node = ResourceNode::from_value(NodeKind::SiteDrive, id, value)?;
        self.access_control
            .decorate(&mut node, parent, Grants::Inherited)
            .await?;
        Ok(node)
    }

    async fn drive_item(
        &self,
        value: Value,
        drive_id: &str,
        parent: Option<&AccessControl>,
        mode: SyncMode,
    ) -> Result<Emission, SyncError> {
        let id = required_str(&value, NodeKind::DriveItem, "id")?;
        let timestamp = value
            .get("lastModifiedDateTime")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut node =
            ResourceNode::from_value(NodeKind::DriveItem, id.clone(), value)?.with_timestamp(timestamp);

        let operation = match mode {
            SyncMode::Incremental if node.is_deleted() => Operation::Delete,
            SyncMode::Full | SyncMode::Incremental => Operation::Index,
        };
        let grants = match operation {
            // Permissions of a deleted item are gone
            Operation::Delete => Grants::Inherited,
            Operation::Index => Grants::DriveItem {
                drive_id,
                item_id: &id,
            },
        };
        self.access_control.decorate(&mut node, parent, grants).await?;

        let content = match self.policy.skip_reason(&node, Utc::now()) {
            None => {
                let name = node.str_field("name").unwrap_or_default().to_string();
                node.set_field(ORIGINAL_FILENAME_FIELD, Value::String(name));
                let fetch = DriveItemContent::new(Arc::clone(&self.downloader), &node, drive_id);
                Some(Box::new(fetch) as Box<dyn ContentFetch>)
            }
            Some(reason @ (SkipReason::TooOld | SkipReason::TooLarge | SkipReason::InvalidTimestamp)) => {
                warn!(
                    id = node.id(),
                    name = node.str_field("name").unwrap_or_default(),
                    size = item_size(&node),
                    modified = node.timestamp().unwrap_or_default(),
                    ?reason,
                    "Not downloading file"
                );
                None
            }
            Some(SkipReason::NoDownloadUrl | SkipReason::NoTimestamp) => None,
        };

        Ok(Emission::index(node)
            .with_content(content)
            .with_operation(operation))
    }

    async fn site_list(
        &self,
        value: Value,
        web_url: &str,
        parent: Option<&AccessControl>,
    ) -> Result<ResourceNode, SyncError> {
        let id = required_str(&value, NodeKind::SiteList, "id")?;
        let name = required_str(&value, NodeKind::SiteList, "name")?;
        let mut node = ResourceNode::from_value(NodeKind::SiteList, id, value)?;
        self.access_control
            .decorate(
                &mut node,
                parent,
                Grants::SiteList {
                    web_url,
                    list_name: &name,
                },
            )
            .await?;
        Ok(node)
    }

    /// List item node, or `None` for content types that are not indexed
    async fn list_item(
        &self,
        value: Value,
        list: &ListContext<'_>,
        parent: Option<&AccessControl>,
    ) -> Result<Option<ResourceNode>, SyncError> {
        let natural_id = required_str(&value, NodeKind::ListItem, "id")?;
        let content_type = value
            .get("contentType")
            .and_then(|ct| ct.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if SKIPPED_CONTENT_TYPES.contains(&content_type) {
            debug!(list_id = list.list_id, item_id = %natural_id, content_type, "Skipping list item");
            return Ok(None);
        }

        let timestamp = value
            .get("lastModifiedDateTime")
            .and_then(Value::as_str)
            .map(str::to_string);
        let filename = value
            .get("FileName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Item ids are only unique within their list
        let id = format!("{}-{natural_id}", list.list_id);
        let mut node = ResourceNode::from_value(NodeKind::ListItem, id, value)?.with_timestamp(timestamp);
        node.set_field(ORIGINAL_FILENAME_FIELD, Value::String(filename));

        self.access_control
            .decorate(
                &mut node,
                parent,
                Grants::ListItem {
                    web_url: list.web_url,
                    list_name: list.list_name,
                    item_id: &natural_id,
                },
            )
            .await?;
        Ok(Some(node))
    }

    /// Attachment emission; inherits the list item's timestamp and access
    async fn attachment(&self, value: Value, list_item: &ResourceNode) -> Result<Emission, SyncError> {
        let odata_id = required_str(&value, NodeKind::ListItemAttachment, "odata.id")?;
        let filename = value
            .get("FileName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut node = ResourceNode::from_value(NodeKind::ListItemAttachment, odata_id.clone(), value)?
            .with_timestamp(list_item.timestamp().map(str::to_string));
        node.set_field(ORIGINAL_FILENAME_FIELD, Value::String(filename.clone()));
        self.access_control
            .decorate(&mut node, list_item.access_control(), Grants::Inherited)
            .await?;

        let fetch = AttachmentContent::new(Arc::clone(&self.downloader), &odata_id, &filename);
        Ok(Emission::index(node).with_content(Some(Box::new(fetch) as Box<dyn ContentFetch>)))
    }

    async fn site_page(
        &self,
        value: Value,
        web_url: &str,
        parent: Option<&AccessControl>,
    ) -> Result<ResourceNode, SyncError> {
        // The page GUID is not unique across sites
        let odata_id = required_str(&value, NodeKind::SitePage, "odata.id")?;
        let page_id = match value.get("Id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(missing(NodeKind::SitePage, "Id").into()),
        };

        let mut node = ResourceNode::from_value(NodeKind::SitePage, odata_id, value)?;
        for field in PAGE_HTML_FIELDS {
            if let Some(html) = node.str_field(field) {
                let text = html_to_text(html);
                node.set_field(field, Value::String(text));
            }
        }

        self.access_control
            .decorate(
                &mut node,
                parent,
                Grants::SitePage {
                    web_url,
                    page_id: &page_id,
                },
            )
            .await?;
        Ok(node)
    }
}

fn required_str(value: &Value, kind: NodeKind, field: &str) -> Result<String, DomainError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(kind, field))
}

fn missing(kind: NodeKind, field: &str) -> DomainError {
    DomainError::MissingField {
        kind: kind.to_string(),
        field: field.to_string(),
    }
}
