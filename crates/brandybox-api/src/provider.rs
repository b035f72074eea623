//! HttpRemoteStore - IRemoteStore implementation for the Brandy Box server
//!
//! Wraps an [`ApiClient`] and adapts it to the [`IRemoteStore`] port.
//!
//! ## Design Notes
//!
//! - The server has no directories of its own: they exist through the
//!   paths of the files inside them. `models_directories()` stays false
//!   and directory deletions are no-ops.
//! - Upload bodies and download bodies are streamed; no file is held in
//!   memory as a whole.

use brandybox_core::domain::{ContentHash, EntryKind, RelativePath};
use brandybox_core::ports::{
    ByteReader, IRemoteStore, RemoteItem, TransportError, UploadReceipt,
};
use futures_util::TryStreamExt;
use reqwest::Body;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, instrument, warn};

use crate::client::{ApiClient, FileItem};

/// Remote store backed by the Brandy Box HTTP API
pub struct HttpRemoteStore {
    client: ApiClient,
}

impl HttpRemoteStore {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

/// Parses a hash reported by the server, dropping anything malformed
fn parse_hash(path: &str, hash: Option<String>) -> Option<ContentHash> {
    let hash = hash?;
    match ContentHash::new(hash.as_str()) {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!(path, error = %e, "Ignoring malformed content hash from server");
            None
        }
    }
}

fn to_remote_item(item: FileItem) -> RemoteItem {
    let kind = match item.kind.as_deref() {
        Some("directory") | Some("dir") => EntryKind::Directory,
        _ => EntryKind::File,
    };
    let hash = parse_hash(&item.path, item.hash);
    RemoteItem {
        path: item.path,
        kind,
        size: item.size,
        modified: item.mtime,
        hash,
    }
}

#[async_trait::async_trait]
impl IRemoteStore for HttpRemoteStore {
    #[instrument(skip(self))]
    async fn list_remote(&self) -> Result<Vec<RemoteItem>, TransportError> {
        let items = self.client.list_files().await?;
        Ok(items.into_iter().map(to_remote_item).collect())
    }

    #[instrument(skip(self, path, reader), fields(path = %path))]
    async fn upload(
        &self,
        path: &RelativePath,
        reader: ByteReader,
        size: u64,
    ) -> Result<UploadReceipt, TransportError> {
        let body = Body::wrap_stream(ReaderStream::new(reader));
        let uploaded = self.client.upload_file(path.as_str(), body, size).await?;
        debug!(size = uploaded.size, "Upload accepted");

        Ok(UploadReceipt {
            size: Some(uploaded.size),
            hash: parse_hash(path.as_str(), uploaded.hash),
            modified: None,
        })
    }

    #[instrument(skip(self, path), fields(path = %path))]
    async fn download(&self, path: &RelativePath) -> Result<ByteReader, TransportError> {
        let response = self.client.download_file(path.as_str()).await?;
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    #[instrument(skip(self, path), fields(path = %path))]
    async fn delete(&self, path: &RelativePath, kind: EntryKind) -> Result<(), TransportError> {
        if kind == EntryKind::Directory {
            debug!("Directories are implied on the server, nothing to delete");
            return Ok(());
        }
        self.client.delete_file(path.as_str()).await?;
        Ok(())
    }
}
