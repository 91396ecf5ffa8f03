//! Integration tests for the indexing sinks
//!
//! The JSON-lines sink is driven by a real walk; the bulk indexer talks to a
//! mocked `_bulk` endpoint.

use futures_util::StreamExt;
use serde_json::{json, Value};
use spindex_core::config::{ConfigBuilder, IndexerConfig};
use spindex_core::domain::{NodeKind, ResourceNode};
use spindex_core::ports::{Emission, IDocumentSink, Operation};
use spindex_graph::wait::CancellableWait;
use spindex_sync::sink::{BulkIndexer, JsonLinesSink};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn indexer_config(server: &MockServer) -> IndexerConfig {
    let mut config = ConfigBuilder::new()
        .indexer_host(server.uri())
        .indexer_index("search-sp")
        .build()
        .indexer;
    config.retry_interval = 0;
    config.api_key = Some("secret-key".to_string());
    config
}

fn emission(id: &str) -> Emission {
    Emission::index(ResourceNode::new(NodeKind::Site, id, Default::default()))
}

fn lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn document<'a>(lines: &'a [Value], id: &str) -> &'a Value {
    lines
        .iter()
        .map(|l| &l["document"])
        .find(|d| d["_id"] == id)
        .unwrap_or_else(|| panic!("no document {id}"))
}

async fn walk_into_json_lines(server: &MockServer) -> JsonLinesSink<Vec<u8>> {
    let connector = common::connector(common::test_config(server, false));
    let mut walker = connector.walker().unwrap();
    let mut sink = JsonLinesSink::new(Vec::new(), true);

    let stream = walker.full_sync();
    futures_util::pin_mut!(stream);
    while let Some(emission) = stream.next().await {
        sink.accept(emission.unwrap()).await.unwrap();
    }
    sink.flush().await.unwrap();
    sink
}

#[tokio::test]
async fn test_json_lines_sink_fetches_content() {
    let server = MockServer::start().await;
    common::mount_tenant(&server).await;
    common::mount_full_delta(&server).await;

    let sink = walk_into_json_lines(&server).await;
    let stats = sink.stats();
    let output = lines(&sink.into_inner());

    assert_eq!(output.len(), 9);
    assert!(output.iter().all(|l| l["operation"] == "index"));

    let file = document(&output, "file-1");
    assert_eq!(file["_attachment"], "aGVsbG8=");
    assert_eq!(file["_timestamp"], "2024-05-30T10:00:00Z");
    assert_eq!(file["object_type"], "drive_item");
    assert!(document(&output, "file-2").get("_attachment").is_none());

    let attachment_id = format!("{}/_api/attachments/notes", common::site_url(&server));
    assert_eq!(document(&output, &attachment_id)["_attachment"], "bm90ZSBib2R5");

    assert_eq!(stats.indexed, 9);
    assert_eq!(stats.with_content, 2);
    assert_eq!(stats.content_failures, 0);
}

#[tokio::test]
async fn test_failed_content_fetch_keeps_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drives/drive-1/items/file-1/content"))
        .respond_with(ResponseTemplate::new(403))
        .with_priority(1)
        .mount(&server)
        .await;
    common::mount_tenant(&server).await;
    common::mount_full_delta(&server).await;

    let sink = walk_into_json_lines(&server).await;
    let stats = sink.stats();
    let output = lines(&sink.into_inner());

    let file = document(&output, "file-1");
    assert_eq!(file["name"], "report.txt");
    assert!(file.get("_attachment").is_none());
    assert_eq!(stats.content_failures, 1);
    assert_eq!(stats.indexed, 9);
}

#[tokio::test]
async fn test_bulk_indexer_retries_unavailable_host() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("authorization", "ApiKey secret-key"))
        .and(header("content-type", "application/x-ndjson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut indexer =
        BulkIndexer::new(&indexer_config(&server), false, CancellableWait::new()).unwrap();
    indexer.accept(emission("s1")).await.unwrap();
    indexer
        .accept(emission("s2").with_operation(Operation::Delete))
        .await
        .unwrap();
    indexer.flush().await.unwrap();

    let stats = indexer.stats();
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.deleted, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body = lines(&requests[1].body);
    assert_eq!(body[0], json!({"index": {"_index": "search-sp", "_id": "s1"}}));
    assert_eq!(body[1]["object_type"], "site");
    assert_eq!(body[2], json!({"delete": {"_index": "search-sp", "_id": "s2"}}));
}

#[tokio::test]
async fn test_bulk_indexer_flushes_full_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = indexer_config(&server);
    config.bulk_size = 2;
    let mut indexer = BulkIndexer::new(&config, false, CancellableWait::new()).unwrap();
    for id in ["a", "b", "c"] {
        indexer.accept(emission(id)).await.unwrap();
    }
    assert_eq!(indexer.stats().indexed, 2);

    indexer.flush().await.unwrap();
    assert_eq!(indexer.stats().indexed, 3);
}

#[tokio::test]
async fn test_bulk_indexer_counts_rejected_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 400, "error": {"reason": "mapper_parsing_exception"}}}
            ]
        })))
        .mount(&server)
        .await;

    let mut indexer =
        BulkIndexer::new(&indexer_config(&server), false, CancellableWait::new()).unwrap();
    indexer.accept(emission("a")).await.unwrap();
    indexer.accept(emission("b")).await.unwrap();
    indexer.flush().await.unwrap();

    let stats = indexer.stats();
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_bulk_indexer_gives_up_on_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let mut indexer =
        BulkIndexer::new(&indexer_config(&server), false, CancellableWait::new()).unwrap();
    indexer.accept(emission("a")).await.unwrap();
    assert!(indexer.flush().await.is_err());
}

#[tokio::test]
async fn test_wait_for_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"version": {"number": "8.12.0"}})),
        )
        .mount(&server)
        .await;

    let indexer =
        BulkIndexer::new(&indexer_config(&server), false, CancellableWait::new()).unwrap();
    assert!(indexer.ping().await);
    assert!(indexer.wait_for_host().await);

    let mut config = indexer_config(&server);
    config.max_wait_duration = 0;
    let indexer = BulkIndexer::new(&config, false, CancellableWait::new()).unwrap();
    assert!(!indexer.wait_for_host().await);
}
