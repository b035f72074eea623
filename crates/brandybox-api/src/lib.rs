//! Brandy Box API - HTTP client for the Brandy Box file API
//!
//! Provides:
//! - Bearer-authenticated access to the `/api/files` endpoints
//! - Streamed uploads and downloads
//! - An [`IRemoteStore`](brandybox_core::ports::IRemoteStore) adapter for
//!   the sync engine
//!
//! ## Modules
//!
//! - [`client`] - HTTP client and endpoint wrappers
//! - [`provider`] - `HttpRemoteStore`, the remote store port over HTTP

pub mod client;
pub mod provider;

use std::time::Duration;

use brandybox_core::ports::TransportError;
use thiserror::Error;

pub use client::ApiClient;
pub use provider::HttpRemoteStore;

/// Errors that can occur when talking to the Brandy Box server
#[derive(Debug, Error)]
pub enum ApiError {
    /// The access token is missing, expired or lacks permission (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded (429)
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Parsed `Retry-After` header, if one was sent
        retry_after: Option<Duration>,
    },

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ApiError> for TransportError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(msg) => Self::Unauthorized(msg),
            ApiError::NotFound(msg) => Self::NotFound(msg),
            ApiError::TooManyRequests { retry_after } => Self::RateLimited { retry_after },
            ApiError::Status { status, message } => Self::Server { status, message },
            ApiError::Network(e) if e.is_decode() => Self::InvalidResponse(e.to_string()),
            ApiError::Network(e) => Self::Network(e.to_string()),
            ApiError::InvalidResponse(msg) => Self::InvalidResponse(msg),
        }
    }
}
