//! Brandy Box file API client
//!
//! A thin typed layer over `reqwest`: it adds the bearer token, builds
//! endpoint URLs, and turns HTTP statuses into [`ApiError`]s. Retrying is
//! left to the caller.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use brandybox_api::client::ApiClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = ApiClient::with_base_url("access-token", "https://brandybox.example");
//! for item in client.list_files().await? {
//!     println!("{} {}", item.path, item.mtime);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Context;
use brandybox_core::config::Config;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ApiError;

/// Connect timeout for every request
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// API response types
// ============================================================================

/// One entry of `GET /api/files/list`
#[derive(Debug, Clone, Deserialize)]
pub struct FileItem {
    pub path: String,
    /// Seconds since the Unix epoch
    pub mtime: f64,
    /// Hex SHA-256 of the content, when the server has recorded one
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// `"file"` or `"directory"`; absent means file
    #[serde(default)]
    pub kind: Option<String>,
}

/// Response of `POST /api/files/upload`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Response of `GET /api/files/storage`
#[derive(Debug, Clone, Deserialize)]
pub struct StorageInfo {
    pub used_bytes: u64,
    #[serde(default)]
    pub limit_bytes: Option<u64>,
}

// ============================================================================
// ApiClient
// ============================================================================

/// HTTP client for the Brandy Box server
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    access_token: String,
    /// Applied to metadata requests; transfers are only bounded by the
    /// connect timeout
    timeout: Duration,
}

impl ApiClient {
    /// Creates a client for `base_url` with the given token and timeout
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url.into()),
            access_token: access_token.into(),
            timeout,
        })
    }

    /// Creates a client with default settings (useful for testing)
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: normalize_base_url(base_url.into()),
            access_token: access_token.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Builds a client from the `remote` config section and the
    /// environment
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let base_url = config.remote.resolve_base_url();
        let token = config
            .remote
            .resolve_access_token()
            .context("No access token available")?;
        let timeout = Duration::from_secs(config.remote.timeout_secs.max(1));
        info!(%base_url, timeout_secs = timeout.as_secs(), "Creating API client");
        Self::new(base_url, token, timeout).context("Failed to build HTTP client")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request for an endpoint below the base URL
    pub fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Lists every file of the account
    pub async fn list_files(&self) -> Result<Vec<FileItem>, ApiError> {
        debug!("Listing remote files");
        let response = self
            .request(Method::GET, "/api/files/list")
            .timeout(self.timeout)
            .send()
            .await?;
        let items: Vec<FileItem> = check(response, "list").await?.json().await?;
        debug!(count = items.len(), "Remote listing received");
        Ok(items)
    }

    /// Uploads `body` (of `size` bytes) to `path`, replacing any previous
    /// content
    pub async fn upload_file(
        &self,
        path: &str,
        body: Body,
        size: u64,
    ) -> Result<UploadResponse, ApiError> {
        debug!(path, size, "Uploading");
        let response = self
            .request(Method::POST, "/api/files/upload")
            .query(&[("path", path)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        let uploaded: UploadResponse = check(response, path).await?.json().await?;
        Ok(uploaded)
    }

    /// Starts a download of `path`; the body is read by the caller
    pub async fn download_file(&self, path: &str) -> Result<Response, ApiError> {
        debug!(path, "Downloading");
        let response = self
            .request(Method::GET, "/api/files/download")
            .query(&[("path", path)])
            .send()
            .await?;
        check(response, path).await
    }

    /// Deletes `path`; a file that is already gone counts as deleted
    pub async fn delete_file(&self, path: &str) -> Result<(), ApiError> {
        debug!(path, "Deleting");
        let response = self
            .request(Method::DELETE, "/api/files/delete")
            .query(&[("path", path)])
            .timeout(self.timeout)
            .send()
            .await?;
        match check(response, path).await {
            Ok(_) => Ok(()),
            Err(ApiError::NotFound(_)) => {
                debug!(path, "Already absent on server");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Storage used by the account and its limit
    pub async fn storage(&self) -> Result<StorageInfo, ApiError> {
        let response = self
            .request(Method::GET, "/api/files/storage")
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(check(response, "storage").await?.json().await?)
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Passes successful responses through and classifies the rest
async fn check(response: Response, what: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        warn!(what, ?retry_after, "Rate limited by server");
        return Err(ApiError::TooManyRequests { retry_after });
    }

    let message = detail(response).await;
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Unauthorized(format!("{status}: {message}"))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(what.to_string()),
        _ => ApiError::Status {
            status: status.as_u16(),
            message,
        },
    })
}

/// The server's error text: the `detail` field of a JSON body, else the
/// raw body
async fn detail(response: Response) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: serde_json::Value,
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => text,
    }
}

/// Parses a `Retry-After` header value
///
/// The header can be either:
/// - An integer number of seconds (e.g., "30")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2027 23:59:59 GMT"), taken as the
///   time remaining from now and capped at one hour
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let remaining = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    let seconds = u64::try_from(remaining.num_seconds()).unwrap_or(0);
    Some(Duration::from_secs(seconds.min(3600)))
}
