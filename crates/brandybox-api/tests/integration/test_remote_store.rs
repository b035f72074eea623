//! HttpRemoteStore against a mocked server

use brandybox_api::HttpRemoteStore;
use brandybox_core::domain::{EntryKind, RelativePath};
use brandybox_core::ports::{ByteReader, IRemoteStore, TransportError};
use tokio::io::AsyncReadExt;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn p(s: &str) -> RelativePath {
    RelativePath::new(s).unwrap()
}

fn reader(data: &'static [u8]) -> ByteReader {
    Box::new(std::io::Cursor::new(data))
}

async fn read_all(mut reader: ByteReader) -> Vec<u8> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await.unwrap();
    data
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_listing_becomes_remote_items() {
    let (server, client) = common::setup_mock().await;
    common::mount_list(
        &server,
        serde_json::json!([
            {"path": "docs/hello.txt", "mtime": 1700000000.0, "hash": HELLO_SHA256, "size": 5},
            {"path": "legacy.bin", "mtime": 1600000000.0, "hash": "md5:abc"}
        ]),
    )
    .await;
    let store = HttpRemoteStore::new(client);

    let items = store.list_remote().await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, EntryKind::File);
    assert_eq!(items[0].hash.as_ref().unwrap().as_str(), HELLO_SHA256);
    assert_eq!(items[0].size, Some(5));
    // Unknown hash formats are treated as missing
    assert_eq!(items[1].hash, None);
    assert!(!store.models_directories());
}

#[tokio::test]
async fn test_listing_failure_is_transport_error() {
    let (server, client) = common::setup_mock().await;
    common::mount_status(&server, "/api/files/list", ResponseTemplate::new(502)).await;
    let store = HttpRemoteStore::new(client);

    let err = store.list_remote().await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, TransportError::Server { status: 502, .. }));
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_upload_streams_body_and_returns_receipt() {
    let (server, client) = common::setup_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/files/upload"))
        .and(query_param("path", "docs/hello.txt"))
        .and(header("Content-Type", "application/octet-stream"))
        .and(body_bytes(b"hello".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "path": "docs/hello.txt",
            "size": 5,
            "hash": HELLO_SHA256,
        })))
        .expect(1)
        .mount(&server)
        .await;
    let store = HttpRemoteStore::new(client);

    let receipt = store
        .upload(&p("docs/hello.txt"), reader(b"hello"), 5)
        .await
        .unwrap();
    assert_eq!(receipt.size, Some(5));
    assert_eq!(receipt.hash.unwrap().as_str(), HELLO_SHA256);
    assert_eq!(receipt.modified, None);
}

#[tokio::test]
async fn test_upload_over_quota_is_not_transient() {
    let (server, client) = common::setup_mock().await;
    common::mount_status(
        &server,
        "/api/files/upload",
        ResponseTemplate::new(507).set_body_json(serde_json::json!({
            "detail": "Your storage limit has been reached"
        })),
    )
    .await;
    let store = HttpRemoteStore::new(client);

    let err = store
        .upload(&p("big.iso"), reader(b"data"), 4)
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert!(err.to_string().contains("storage limit"));
}

#[tokio::test]
async fn test_upload_receipt_without_hash() {
    let (server, client) = common::setup_mock().await;
    common::mount_upload(&server, "a.txt", 5, "").await;
    let store = HttpRemoteStore::new(client);

    let receipt = store.upload(&p("a.txt"), reader(b"hello"), 5).await.unwrap();
    assert_eq!(receipt.size, Some(5));
    assert_eq!(receipt.hash, None);
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn test_download_streams_content() {
    let (server, client) = common::setup_mock().await;
    let content: Vec<u8> = (0..262_144).map(|i| (i % 251) as u8).collect();
    common::mount_download(&server, "media/clip.bin", &content).await;
    let store = HttpRemoteStore::new(client);

    let data = read_all(store.download(&p("media/clip.bin")).await.unwrap()).await;
    assert_eq!(data, content);
}

#[tokio::test]
async fn test_download_missing_file_is_not_found() {
    let (server, client) = common::setup_mock().await;
    common::mount_status(
        &server,
        "/api/files/download",
        ResponseTemplate::new(404).set_body_json(serde_json::json!({"detail": "File not found"})),
    )
    .await;
    let store = HttpRemoteStore::new(client);

    let err = match store.download(&p("gone.txt")).await {
        Ok(_) => panic!("expected NotFound"),
        Err(e) => e,
    };
    assert!(err.is_not_found());
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_file_and_absent_file() {
    let (server, client) = common::setup_mock().await;
    common::mount_delete(&server, "a.txt", 200).await;
    common::mount_delete(&server, "gone.txt", 404).await;
    let store = HttpRemoteStore::new(client);

    store.delete(&p("a.txt"), EntryKind::File).await.unwrap();
    store.delete(&p("gone.txt"), EntryKind::File).await.unwrap();
}

#[tokio::test]
async fn test_delete_directory_sends_nothing() {
    let (server, client) = common::setup_mock().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let store = HttpRemoteStore::new(client);

    store.delete(&p("docs"), EntryKind::Directory).await.unwrap();
}
