//! Shared test helpers for walker and sink integration tests
//!
//! [`mount_tenant`] serves a small tenant from a wiremock server:
//!
//! ```text
//! collection (contoso.sharepoint.com)
//! └── site-1 "engineering" at {uri}/sites/eng
//!     ├── drive-1
//!     │   ├── file-1  report.txt (5 bytes, downloadable)
//!     │   └── file-2  video.mp4  (20 MB)
//!     ├── list-1 "Tasks"
//!     │   ├── item 1  (one attachment: notes.txt)
//!     │   └── item 2  (Web Template Extensions, skipped)
//!     └── page 1 "Home"
//! ```
//!
//! The drive's delta listing is mounted separately so incremental tests can
//! serve their own pages.

use std::collections::BTreeSet;

use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use spindex_core::config::{Config, ConfigBuilder};
use spindex_core::domain::ResourceNode;
use spindex_core::ports::Emission;
use spindex_graph::wait::CancellableWait;
use spindex_sync::connector::SharepointConnector;
use spindex_sync::SyncError;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT_ID: &str = "tenant-test-001";
pub const SITE_PATH: &str = "/sites/eng";
pub const FILE_BODY: &str = "hello";
pub const ATTACHMENT_BODY: &str = "note body";
pub const LARGE_FILE_SIZE: u64 = 20_000_000;

/// Config pointing every API at `server`
pub fn test_config(server: &MockServer, document_level_security: bool) -> Config {
    ConfigBuilder::new()
        .tenant(TENANT_ID, "contoso", "client-test-001", "secret")
        .override_url(server.uri())
        .enable_document_level_security(document_level_security)
        .build()
}

pub fn connector(config: Config) -> SharepointConnector {
    SharepointConnector::new(config, CancellableWait::new()).expect("connector builds")
}

/// Web URL of the only site of the tenant
pub fn site_url(server: &MockServer) -> String {
    format!("{}{SITE_PATH}", server.uri())
}

/// Delta link the full listing of drive-1 ends with
pub fn first_delta_link(server: &MockServer) -> String {
    format!("{}/drives/drive-1/root/delta?token=t1", server.uri())
}

/// Drains a walker stream, failing the test on the first error
pub async fn drain<S>(stream: S) -> Vec<Emission>
where
    S: Stream<Item = Result<Emission, SyncError>>,
{
    stream
        .map(|emission| emission.expect("walk succeeds"))
        .collect()
        .await
}

pub fn ids(emissions: &[Emission]) -> Vec<&str> {
    emissions.iter().map(|e| e.node.id()).collect()
}

pub fn find<'a>(emissions: &'a [Emission], id: &str) -> &'a Emission {
    emissions
        .iter()
        .find(|e| e.node.id() == id)
        .unwrap_or_else(|| panic!("no emission with id {id}"))
}

/// Principal names of a node's access control set
pub fn acl(node: &ResourceNode) -> BTreeSet<String> {
    node.access_control()
        .expect("node is decorated")
        .iter()
        .map(|p| p.as_str().to_string())
        .collect()
}

pub fn principals(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Mounts both token endpoints
pub async fn mount_tokens(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{TENANT_ID}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "graph-test-token",
            "expires_in": 3599
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/{TENANT_ID}/tokens/OAuth/2")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "rest-test-token",
            "expires_in": "86399"
        })))
        .mount(server)
        .await;
}

/// Mounts tokens, collection, site, drive, list, page and permission routes
pub async fn mount_tenant(server: &MockServer) {
    let uri = server.uri();
    let site_url = site_url(server);
    mount_tokens(server).await;

    mount_json(
        server,
        "/sites/",
        json!({"value": [{
            "webUrl": uri,
            "siteCollection": {"hostname": "contoso.sharepoint.com", "root": {}}
        }]}),
    )
    .await;
    mount_json(
        server,
        "/sites/contoso.sharepoint.com/sites",
        json!({"value": [{"id": "site-1", "name": "engineering", "webUrl": site_url}]}),
    )
    .await;
    mount_json(
        server,
        "/sites/site-1/drives",
        json!({"value": [{"id": "drive-1", "name": "Documents"}]}),
    )
    .await;

    // Drive item content and permissions
    Mock::given(method("GET"))
        .and(path("/drives/drive-1/items/file-1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FILE_BODY))
        .mount(server)
        .await;
    mount_json(
        server,
        "/drives/drive-1/items/file-1/permissions",
        json!({"value": [{"grantedToV2": {"user": {"email": "bo@contoso.com"}}}]}),
    )
    .await;
    mount_status(server, "/drives/drive-1/items/file-2/permissions", 404).await;
    mount_status(server, "/drives/drive-1/items/file-3/permissions", 404).await;

    // Site principals
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/web/sitegroups"),
        json!({"value": [{"Title": "Eng Owners"}]}),
    )
    .await;
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/web/siteusers"),
        json!({"value": [{"UserPrincipalName": "ana@contoso.com"}, {"Title": "System Account"}]}),
    )
    .await;
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/web/GetUserById('7')"),
        json!({"Email": "cy@contoso.com", "Title": "Cy"}),
    )
    .await;
    mount_status(server, &format!("{SITE_PATH}/_api/web/GetUserById('8')"), 500).await;
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/web/GetUserById('9')"),
        json!({"UserPrincipalName": "dee@contoso.com"}),
    )
    .await;

    // Lists
    mount_json(
        server,
        "/sites/site-1/lists",
        json!({"value": [{"id": "list-1", "name": "Tasks"}]}),
    )
    .await;
    mount_json(
        server,
        "/sites/site-1/lists/list-1/items",
        json!({"value": [
            {
                "id": "1",
                "contentType": {"name": "Item"},
                "lastModifiedDateTime": "2024-05-30T10:00:00Z",
                "fields": {"Title": "Ship it", "Attachments": true}
            },
            {
                "id": "2",
                "contentType": {"name": "Web Template Extensions"},
                "fields": {"Attachments": false}
            }
        ]}),
    )
    .await;
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/lists/GetByTitle('Tasks')/roleassignments"),
        json!({"value": [{"PrincipalId": 7}, {"PrincipalId": 8}]}),
    )
    .await;
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/lists/GetByTitle('Tasks')/items(1)/roleassignments"),
        json!({"value": [{"PrincipalId": 9}]}),
    )
    .await;
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/lists/GetByTitle('Tasks')/items(1)"),
        json!({"AttachmentFiles": [{
            "FileName": "notes.txt",
            "odata.id": format!("{site_url}/_api/attachments/notes")
        }]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("{SITE_PATH}/_api/attachments/notes/$value")))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATTACHMENT_BODY))
        .mount(server)
        .await;

    // Pages
    mount_json(
        server,
        &format!("{SITE_PATH}/_api/web/lists/GetByTitle('Site%20Pages')/items"),
        json!({"value": [{
            "Id": 1,
            "odata.id": format!("{site_url}/_api/pages(1)"),
            "Title": "Home",
            "CanvasContent1": "<div><p>Hello &amp; welcome</p><script>track()</script></div>"
        }]}),
    )
    .await;
    mount_status(
        server,
        &format!("{SITE_PATH}/_api/web/lists/GetByTitle('Site%20Pages')/items(1)/RoleAssignments"),
        404,
    )
    .await;
}

/// Serves the full delta listing of drive-1 over two pages
pub async fn mount_full_delta(server: &MockServer) {
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path("/drives/drive-1/root/delta"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [],
            "@odata.deltaLink": format!("{uri}/drives/drive-1/root/delta?token=t1")
        })))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drives/drive-1/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "id": "file-1",
                    "name": "report.txt",
                    "size": 5,
                    "lastModifiedDateTime": "2024-05-30T10:00:00Z",
                    "@microsoft.graph.downloadUrl": format!("{uri}/download/file-1"),
                    "parentReference": {"driveId": "drive-1"}
                },
                {
                    "id": "file-2",
                    "name": "video.mp4",
                    "size": LARGE_FILE_SIZE,
                    "lastModifiedDateTime": "2024-05-30T11:00:00Z",
                    "@microsoft.graph.downloadUrl": format!("{uri}/download/file-2"),
                    "parentReference": {"driveId": "drive-1"}
                }
            ],
            "@odata.nextLink": format!("{uri}/drives/drive-1/root/delta?page=2")
        })))
        .mount(server)
        .await;
}
