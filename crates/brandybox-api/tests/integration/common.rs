//! Shared helpers for Brandy Box API integration tests
//!
//! Each helper mounts one endpoint on a wiremock server. Every mock
//! requires the test bearer token, so an unauthenticated request falls
//! through to wiremock's default 404.

use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use brandybox_api::client::ApiClient;

pub const TOKEN: &str = "test-access-token";

/// Starts a mock server and returns a client pointed at it
pub async fn setup_mock() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let client = ApiClient::with_base_url(TOKEN, server.uri());
    (server, client)
}

fn authorized(method_name: &str, endpoint: &str) -> wiremock::MockBuilder {
    Mock::given(method(method_name))
        .and(path(endpoint))
        .and(header("Authorization", format!("Bearer {TOKEN}").as_str()))
}

/// Mounts `GET /api/files/list` returning `items`
pub async fn mount_list(server: &MockServer, items: serde_json::Value) {
    authorized("GET", "/api/files/list")
        .respond_with(ResponseTemplate::new(200).set_body_json(items))
        .mount(server)
        .await;
}

/// Mounts `GET /api/files/download?path=<file>` returning `content`
pub async fn mount_download(server: &MockServer, file: &str, content: &[u8]) {
    authorized("GET", "/api/files/download")
        .and(query_param("path", file))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(content.to_vec()),
        )
        .mount(server)
        .await;
}

/// Mounts `POST /api/files/upload?path=<file>` answering with the given
/// size and hash
pub async fn mount_upload(server: &MockServer, file: &str, size: u64, hash: &str) {
    authorized("POST", "/api/files/upload")
        .and(query_param("path", file))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "path": file,
            "size": size,
            "hash": hash,
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Mounts `DELETE /api/files/delete?path=<file>` answering with `status`
pub async fn mount_delete(server: &MockServer, file: &str, status: u16) {
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "path": file,
            "deleted": true,
        }))
    } else {
        ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "detail": "File not found",
        }))
    };
    authorized("DELETE", "/api/files/delete")
        .and(query_param("path", file))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mounts any method on `endpoint` answering with a bare status
pub async fn mount_status(server: &MockServer, endpoint: &str, template: ResponseTemplate) {
    Mock::given(path(endpoint))
        .respond_with(template)
        .mount(server)
        .await;
}
