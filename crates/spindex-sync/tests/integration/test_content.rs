//! Integration tests for lazy content fetchers

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use spindex_core::domain::{NodeKind, ResourceNode};
use spindex_core::ports::{ContentFetch, ITextExtractor};
use spindex_sync::content::{AttachmentContent, ContentDownloader, DriveItemContent};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

/// Echoes the file name, extension and content back as text
struct EchoExtractor;

#[async_trait]
impl ITextExtractor for EchoExtractor {
    fn is_configured(&self) -> bool {
        true
    }

    async fn extract_text(&self, path: &Path, original_filename: &str) -> anyhow::Result<String> {
        let text = tokio::fs::read_to_string(path).await?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("{original_filename} ({extension}): {text}"))
    }
}

async fn setup(extraction: bool) -> (MockServer, Arc<ContentDownloader>) {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;
    let connector = common::connector(common::test_config(&server, false));
    let downloader = ContentDownloader::new(Arc::clone(connector.client()), extraction);
    (server, Arc::new(downloader))
}

async fn mount_file(server: &MockServer, item_id: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/drives/drive-1/items/{item_id}/content")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn drive_item(id: &str, name: &str, size: u64) -> ResourceNode {
    ResourceNode::from_value(
        NodeKind::DriveItem,
        id,
        json!({
            "id": id,
            "name": name,
            "size": size,
            "parentReference": {"driveId": "drive-1"}
        }),
    )
    .unwrap()
    .with_timestamp(Some("2024-05-30T10:00:00Z".to_string()))
}

#[tokio::test]
async fn test_drive_item_content_is_base64_encoded() {
    let (server, downloader) = setup(false).await;
    mount_file(&server, "file-1", common::FILE_BODY).await;

    let fetch = DriveItemContent::new(downloader, &drive_item("file-1", "report.txt", 5), "other");
    let content = fetch.fetch(true).await.unwrap().expect("content");

    assert_eq!(content.id, "file-1");
    assert_eq!(content.timestamp.as_deref(), Some("2024-05-30T10:00:00Z"));
    assert_eq!(content.attachment.as_deref(), Some("aGVsbG8="));
    assert!(content.body.is_none());
}

#[tokio::test]
async fn test_fetch_without_doit_downloads_nothing() {
    let (server, downloader) = setup(false).await;
    mount_file(&server, "file-1", common::FILE_BODY).await;

    let fetch = DriveItemContent::new(downloader, &drive_item("file-1", "report.txt", 5), "drive-1");
    assert!(fetch.fetch(false).await.unwrap().is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_and_empty_items_are_not_downloaded() {
    let (server, downloader) = setup(false).await;

    let large = DriveItemContent::new(
        Arc::clone(&downloader),
        &drive_item("file-2", "video.mp4", common::LARGE_FILE_SIZE),
        "drive-1",
    );
    assert!(large.fetch(true).await.unwrap().is_none());

    let empty = DriveItemContent::new(downloader, &drive_item("file-4", "empty.txt", 0), "drive-1");
    assert!(empty.fetch(true).await.unwrap().is_none());

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_extraction_replaces_attachment_with_body() {
    let (server, _) = setup(true).await;
    mount_file(&server, "file-1", common::FILE_BODY).await;
    let connector = common::connector(common::test_config(&server, false));
    let downloader = ContentDownloader::new(Arc::clone(connector.client()), true)
        .with_extractor(Arc::new(EchoExtractor));

    let fetch = DriveItemContent::new(
        Arc::new(downloader),
        &drive_item("file-1", "report.txt", 5),
        "drive-1",
    );
    let content = fetch.fetch(true).await.unwrap().expect("content");

    assert!(content.attachment.is_none());
    assert_eq!(content.body.as_deref(), Some("report.txt (txt): hello"));
}

#[tokio::test]
async fn test_extraction_without_extractor_yields_empty_body() {
    let (server, downloader) = setup(true).await;
    mount_file(&server, "file-1", common::FILE_BODY).await;

    let fetch = DriveItemContent::new(downloader, &drive_item("file-1", "report.txt", 5), "drive-1");
    let content = fetch.fetch(true).await.unwrap().expect("content");

    assert!(content.attachment.is_none());
    assert_eq!(content.body.as_deref(), Some(""));
}

#[tokio::test]
async fn test_failed_download_is_an_error() {
    let (server, downloader) = setup(false).await;
    Mock::given(method("GET"))
        .and(path("/drives/drive-1/items/file-1/content"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fetch = DriveItemContent::new(downloader, &drive_item("file-1", "report.txt", 5), "drive-1");
    assert!(fetch.fetch(true).await.is_err());
}

#[tokio::test]
async fn test_attachment_content_has_fresh_timestamp() {
    let (server, downloader) = setup(false).await;
    Mock::given(method("GET"))
        .and(path("/sites/eng/_api/attachments/notes/$value"))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::ATTACHMENT_BODY))
        .mount(&server)
        .await;

    let odata_id = format!("{}/_api/attachments/notes", common::site_url(&server));
    let before = Utc::now() - chrono::Duration::seconds(1);
    let fetch = AttachmentContent::new(downloader, &odata_id, "notes.txt");
    let content = fetch.fetch(true).await.unwrap().expect("content");

    assert_eq!(content.id, odata_id);
    assert_eq!(content.attachment.as_deref(), Some("bm90ZSBib2R5"));
    let stamped = DateTime::parse_from_rfc3339(content.timestamp.as_deref().unwrap()).unwrap();
    assert!(stamped.with_timezone(&Utc) >= before);
}
