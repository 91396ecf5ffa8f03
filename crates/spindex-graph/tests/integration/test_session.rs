//! Integration tests for the bounded, retrying API session
//!
//! - Pagination order and termination
//! - Delta link surfacing, including item-less final pages
//! - Throttling backoff driven by `Retry-After`
//! - Backoff between transport failures
//! - Status translation and permit release
//! - Chunked byte streaming

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use spindex_graph::{
    rate_limit::ThrottlePolicy,
    session::{GRAPH_NEXT_LINK, REST_NEXT_LINK, TRANSPORT_RETRY_DELAY},
    GraphError,
};
use wiremock::matchers::{header, method, path, query_param};
use tokio::time::Instant;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_stream_pages_follows_next_link_in_order() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/sites/s1/lists"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "c"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sites/s1/lists"))
        .and(header("authorization", format!("Bearer {}", common::GRAPH_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "a"}, {"id": "b"}],
            "@odata.nextLink": format!("{}/sites/s1/lists?page=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let pages: Vec<_> = session
        .stream_pages(format!("{}/sites/s1/lists", server.uri()), GRAPH_NEXT_LINK)
        .collect()
        .await;

    let ids: Vec<Vec<String>> = pages
        .into_iter()
        .map(|page| {
            page.unwrap()
                .iter()
                .map(|item| item["id"].as_str().unwrap().to_string())
                .collect()
        })
        .collect();
    assert_eq!(ids, vec![vec!["a", "b"], vec!["c"]]);
}

#[tokio::test]
async fn test_stream_pages_uses_configured_next_link_field() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    // Graph-style field must be ignored when walking REST collections
    Mock::given(method("GET"))
        .and(path("/_api/web/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"Id": 1}],
            "@odata.nextLink": format!("{}/never", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let pages: Vec<_> = session
        .stream_pages(format!("{}/_api/web/items", server.uri()), REST_NEXT_LINK)
        .collect()
        .await;
    assert_eq!(pages.len(), 1);
}

#[tokio::test]
async fn test_delta_link_on_empty_final_page_is_surfaced() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .and(query_param("$skiptoken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [],
            "@odata.deltaLink": format!("{}/drives/d1/root/delta?token=final", server.uri())
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "i1"}, {"id": "i2"}],
            "@odata.nextLink": format!("{}/drives/d1/root/delta?$skiptoken=p2", server.uri())
        })))
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let pages: Vec<_> = session
        .stream_delta_pages(format!("{}/drives/d1/root/delta", server.uri()))
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].items.len(), 2);
    assert!(pages[0].delta_link.is_none());
    assert!(pages[1].items.is_empty());
    assert_eq!(
        pages.last().and_then(|p| p.delta_link.as_ref()).map(|l| l.as_str().to_string()),
        Some(format!("{}/drives/d1/root/delta?token=final", server.uri()))
    );
}

#[tokio::test]
async fn test_delta_link_on_last_item_page_not_repeated() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "i1"}],
            "@odata.deltaLink": format!("{}/drives/d1/root/delta?token=t1", server.uri())
        })))
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let pages: Vec<_> = session
        .stream_delta_pages(format!("{}/drives/d1/root/delta", server.uri()))
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(pages.len(), 1);
    assert!(pages[0].delta_link.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_throttled_calls_wait_for_retry_after() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    // Default retry would be an hour; only the headers may drive the waits
    let policy = ThrottlePolicy::new(3, Duration::from_secs(3600));
    let session = common::graph_session(&server, policy, 10);

    let start = Instant::now();
    let body = session
        .fetch_json(&format!("{}/sites", server.uri()))
        .await
        .expect("third attempt succeeds");
    let elapsed = start.elapsed();

    assert_eq!(body, json!({"value": []}));
    assert!(elapsed >= Duration::from_secs(3), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3600), "waited {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_back_off_between_attempts() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    // Nothing listens on a port whose listener was just dropped
    let unreachable = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let session = common::graph_session(&server, common::fast_policy(), 1);
    let start = Instant::now();
    let err = session
        .fetch_json(&format!("http://{unreachable}/sites"))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, GraphError::Network(_)), "{err:?}");
    // Three attempts wait once after the first failure and twice after the second
    assert!(elapsed >= TRANSPORT_RETRY_DELAY * 3, "waited {elapsed:?}");
    assert_eq!(session.available_permits(), 1);
}

#[tokio::test]
async fn test_throttling_budget_exhausted() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let err = session
        .fetch_json(&format!("{}/sites", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GraphError::Throttled {
            status: 429,
            attempts: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/items/i1/permissions"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let err = session
        .fetch_json(&format!("{}/drives/d1/items/i1/permissions", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::PermissionsMissing { .. }));
}

#[tokio::test]
async fn test_errors_release_permits() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 2);
    for _ in 0..5 {
        let err = session
            .fetch_json(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = session
            .fetch_json(&format!("{}/broken", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InternalServerError(_)));
    }
    assert_eq!(session.available_permits(), 2);
}

#[tokio::test]
async fn test_pipe_bytes_streams_whole_body() {
    let server = MockServer::start().await;
    common::mount_tokens(&server).await;

    let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/drives/d1/items/i1/content"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.clone())
                .append_header("Content-Type", "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 1);
    let mut sink: Vec<u8> = Vec::new();
    let written = session
        .pipe_bytes(&format!("{}/drives/d1/items/i1/content", server.uri()), &mut sink)
        .await
        .unwrap();

    assert_eq!(written, 5000);
    assert_eq!(sink, content);
    assert_eq!(session.available_permits(), 1);
}
