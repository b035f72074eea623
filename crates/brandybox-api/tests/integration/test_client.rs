//! ApiClient endpoint and status handling

use std::time::Duration;

use brandybox_api::client::ApiClient;
use brandybox_api::ApiError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_files_parses_items() {
    let (server, client) = common::setup_mock().await;
    common::mount_list(
        &server,
        serde_json::json!([
            {"path": "a.txt", "mtime": 1700000000.25},
            {"path": "docs/b.txt", "mtime": 1700000100.0, "hash": "ff", "size": 12}
        ]),
    )
    .await;

    let items = client.list_files().await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].path, "a.txt");
    assert_eq!(items[0].mtime, 1_700_000_000.25);
    assert_eq!(items[1].hash.as_deref(), Some("ff"));
    assert_eq!(items[1].size, Some(12));
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (server, _) = common::setup_mock().await;
    Mock::given(method("GET"))
        .and(path("/api/files/list"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "detail": "Could not validate credentials"
            })),
        )
        .mount(&server)
        .await;

    let client = ApiClient::with_base_url("stale-token", server.uri());
    let err = client.list_files().await.unwrap_err();
    match err {
        ApiError::Unauthorized(msg) => assert!(msg.contains("Could not validate credentials")),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forbidden_is_unauthorized() {
    let (server, client) = common::setup_mock().await;
    common::mount_status(&server, "/api/files/list", ResponseTemplate::new(403)).await;

    assert!(matches!(
        client.list_files().await,
        Err(ApiError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let (server, client) = common::setup_mock().await;
    common::mount_status(
        &server,
        "/api/files/list",
        ResponseTemplate::new(429).insert_header("Retry-After", "7"),
    )
    .await;

    match client.list_files().await {
        Err(ApiError::TooManyRequests { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected TooManyRequests, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_keeps_status_and_detail() {
    let (server, client) = common::setup_mock().await;
    common::mount_status(
        &server,
        "/api/files/list",
        ResponseTemplate::new(503).set_body_string("maintenance"),
    )
    .await;

    match client.list_files().await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    // Port 9 (discard) is not listening on test machines
    let client = ApiClient::with_base_url(common::TOKEN, "http://127.0.0.1:9");
    assert!(matches!(
        client.list_files().await,
        Err(ApiError::Network(_))
    ));
}

#[tokio::test]
async fn test_list_times_out() {
    let (server, _) = common::setup_mock().await;
    common::mount_status(
        &server,
        "/api/files/list",
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!([]))
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let client =
        ApiClient::new(server.uri(), common::TOKEN, Duration::from_millis(200)).unwrap();
    match client.list_files().await {
        Err(ApiError::Network(e)) => assert!(e.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }
}

// ============================================================================
// Delete and storage
// ============================================================================

#[tokio::test]
async fn test_delete_missing_file_succeeds() {
    let (server, client) = common::setup_mock().await;
    common::mount_delete(&server, "gone.txt", 404).await;

    client.delete_file("gone.txt").await.unwrap();
}

#[tokio::test]
async fn test_delete_existing_file() {
    let (server, client) = common::setup_mock().await;
    common::mount_delete(&server, "docs/old report.pdf", 200).await;

    client.delete_file("docs/old report.pdf").await.unwrap();
}

#[tokio::test]
async fn test_storage_info() {
    let (server, client) = common::setup_mock().await;
    Mock::given(method("GET"))
        .and(path("/api/files/storage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "used_bytes": 2048,
            "limit_bytes": null
        })))
        .mount(&server)
        .await;

    let info = client.storage().await.unwrap();
    assert_eq!(info.used_bytes, 2048);
    assert_eq!(info.limit_bytes, None);
}
