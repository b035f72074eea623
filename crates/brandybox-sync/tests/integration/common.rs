//! Shared helpers for sync engine integration tests
//!
//! [`MemoryStore`] is an in-process remote store without directories,
//! like the real server. [`Harness`] wires it to a real local filesystem
//! under a temporary directory and a state file in another one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use brandybox_core::domain::{ContentHash, EntryKind, RelativePath};
use brandybox_core::ports::{
    ByteReader, IRemoteStore, RemoteItem, TransportError, UploadReceipt,
};
use brandybox_sync::clock::ManualClock;
use brandybox_sync::filesystem::LocalFileSystemAdapter;
use brandybox_sync::metrics::SyncMetrics;
use brandybox_sync::state::StateStore;
use brandybox_sync::{CycleReport, SyncEngine, SyncOptions};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Base of all modification times used in tests
pub const T: f64 = 1_700_000_000.0;

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub data: Vec<u8>,
    pub modified: f64,
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, StoredFile>,
    /// mtime assigned to the next upload
    server_time: f64,
    failures: HashMap<String, TransportError>,
    listing_failure: Option<TransportError>,
    panics: HashSet<String>,
    calls: Vec<String>,
}

/// Remote store kept in memory
pub struct MemoryStore {
    inner: Mutex<Inner>,
    hashed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                server_time: T + 1_000.0,
                ..Default::default()
            }),
            hashed: true,
        }
    }

    /// A store whose listing carries sizes but no content hashes
    pub fn without_hashes() -> Self {
        Self {
            hashed: false,
            ..Self::new()
        }
    }

    pub fn put(&self, path: &str, data: &[u8], modified: f64) {
        self.inner.lock().unwrap().files.insert(
            path.to_string(),
            StoredFile {
                data: data.to_vec(),
                modified,
            },
        );
    }

    /// Deletes `path` as another device would
    pub fn remove(&self, path: &str) {
        self.inner.lock().unwrap().files.remove(path);
    }

    pub fn get(&self, path: &str) -> Option<StoredFile> {
        self.inner.lock().unwrap().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().unwrap().files.keys().cloned().collect()
    }

    /// Makes every request for `path` fail with `error` until cleared
    pub fn fail(&self, path: &str, error: TransportError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert(path.to_string(), error);
    }

    pub fn clear_failure(&self, path: &str) {
        self.inner.lock().unwrap().failures.remove(path);
    }

    /// Makes every request for `path` panic, like a bug in the transport
    pub fn panic_on(&self, path: &str) {
        self.inner.lock().unwrap().panics.insert(path.to_string());
    }

    pub fn fail_listing(&self, error: Option<TransportError>) {
        self.inner.lock().unwrap().listing_failure = error;
    }

    /// Every mutating or content call, as `"<op> <path>"`
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    fn check(&self, op: &str, path: &RelativePath) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("{op} {path}"));
        if inner.panics.contains(path.as_str()) {
            // Release the lock so the store outlives the panicking task
            drop(inner);
            panic!("{op} {path} crashed");
        }
        match inner.failures.get(path.as_str()) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

pub fn sha256(data: &[u8]) -> ContentHash {
    ContentHash::from_digest(&Sha256::digest(data)).unwrap()
}

#[async_trait::async_trait]
impl IRemoteStore for MemoryStore {
    async fn list_remote(&self) -> Result<Vec<RemoteItem>, TransportError> {
        let inner = self.inner.lock().unwrap();
        if let Some(error) = &inner.listing_failure {
            return Err(error.clone());
        }
        Ok(inner
            .files
            .iter()
            .map(|(path, file)| RemoteItem {
                path: path.clone(),
                kind: EntryKind::File,
                size: Some(file.data.len() as u64),
                modified: file.modified,
                hash: self.hashed.then(|| sha256(&file.data)),
            })
            .collect())
    }

    async fn upload(
        &self,
        path: &RelativePath,
        mut reader: ByteReader,
        _size: u64,
    ) -> Result<UploadReceipt, TransportError> {
        self.check("upload", path)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let receipt = UploadReceipt {
            size: Some(data.len() as u64),
            hash: Some(sha256(&data)),
            modified: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.server_time += 1.0;
        let modified = inner.server_time;
        inner
            .files
            .insert(path.to_string(), StoredFile { data, modified });
        Ok(receipt)
    }

    async fn download(&self, path: &RelativePath) -> Result<ByteReader, TransportError> {
        self.check("download", path)?;
        let data = self
            .get(path.as_str())
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?
            .data;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn create_directory(&self, path: &RelativePath) -> Result<(), TransportError> {
        self.check("mkdir", path)
    }

    async fn delete(&self, path: &RelativePath, kind: EntryKind) -> Result<(), TransportError> {
        self.check(&format!("delete-{kind}"), path)?;
        if kind == EntryKind::File {
            self.inner.lock().unwrap().files.remove(path.as_str());
        }
        Ok(())
    }
}

/// A sync root, a state file and an engine connecting them to a store
pub struct Harness {
    pub root_dir: TempDir,
    pub state_dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
    pub engine: SyncEngine,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(MemoryStore::new()).await
    }

    pub async fn with_store(store: MemoryStore) -> Self {
        let root_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let store = Arc::new(store);
        let clock = ManualClock::new();
        let engine = build_engine(
            root_dir.path(),
            &state_dir.path().join("sync_state.json"),
            store.clone(),
            &clock,
        )
        .await;

        Self {
            root_dir,
            state_dir,
            store,
            clock,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.root_dir.path()
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.path().join("sync_state.json")
    }

    /// Replaces the engine, as after a daemon restart
    pub async fn restart(&mut self) {
        self.engine = build_engine(
            self.root_dir.path(),
            &self.state_path(),
            self.store.clone(),
            &self.clock,
        )
        .await;
    }

    pub async fn sync(&self) -> CycleReport {
        self.engine
            .run_cycle(&CancellationToken::new())
            .await
            .expect("cycle should complete")
    }

    /// The state as persisted on disk
    pub async fn saved_state(&self) -> StateStore {
        StateStore::open(&self.state_path()).await.unwrap()
    }

    pub fn write_local(&self, rel: &str, content: &[u8], modified: f64) {
        let target = self.root().join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&target, content).unwrap();
        filetime::set_file_mtime(&target, FileTime::from_unix_time(modified as i64, 0)).unwrap();
    }

    pub fn mkdir_local(&self, rel: &str) {
        std::fs::create_dir_all(self.root().join(rel)).unwrap();
    }

    pub fn read_local(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root().join(rel)).ok()
    }

    pub fn local_exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    pub fn local_mtime(&self, rel: &str) -> i64 {
        let meta = std::fs::metadata(self.root().join(rel)).unwrap();
        FileTime::from_last_modification_time(&meta).unix_seconds()
    }
}

pub async fn build_engine(
    root: &Path,
    state_path: &Path,
    store: Arc<MemoryStore>,
    clock: &ManualClock,
) -> SyncEngine {
    let state = StateStore::open(state_path).await.unwrap();
    SyncEngine::new(
        SyncOptions::new(root),
        Arc::new(LocalFileSystemAdapter::new()),
        store,
        state,
        Arc::new(clock.clone()),
        Arc::new(SyncMetrics::new().unwrap()),
    )
}

pub fn p(path: &str) -> RelativePath {
    RelativePath::new(path).unwrap()
}
