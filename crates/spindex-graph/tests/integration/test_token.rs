//! Integration tests for token acquisition against mocked identity endpoints

use serde_json::json;
use spindex_graph::GraphError;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_token_fetched_once_for_many_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/v2.0/token", common::TENANT_ID)))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=https%3A%2F%2Fgraph.microsoft.com%2F.default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": common::GRAPH_TOKEN,
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(3)
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    for _ in 0..3 {
        session
            .fetch_json(&format!("{}/sites", server.uri()))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_rest_token_uses_sharepoint_resource() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/v2.0/token", common::TENANT_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": common::GRAPH_TOKEN,
            "expires_in": 3599
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{}/tokens/OAuth/2", common::TENANT_ID)))
        .and(body_string_contains("contoso.sharepoint.com"))
        .and(body_string_contains("client-test-001%40tenant-test-001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": common::REST_TOKEN,
            "expires_in": "86399"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::test_config(&server);
    let client = spindex_graph::client::SharepointClient::new(
        &config.tenant,
        &config.http,
        spindex_graph::wait::CancellableWait::new(),
    )
    .unwrap();
    client.authenticate().await.expect("both tokens obtained");
}

#[tokio::test]
async fn test_invalid_tenant_reported_after_three_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/v2.0/token", common::TENANT_ID)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let err = session
        .fetch_json(&format!("{}/sites", server.uri()))
        .await
        .unwrap_err();

    match err {
        GraphError::TokenFetchFailed(message) => {
            assert!(message.contains("Tenant Id, Tenant Name and Client ID"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_secret_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/v2.0/token", common::TENANT_ID)))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = common::graph_session(&server, common::fast_policy(), 10);
    let err = session
        .fetch_json(&format!("{}/sites", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::TokenFetchFailed(ref m) if m.contains("Secret Value")));
}
