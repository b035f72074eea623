//! Port definitions (hexagonal architecture interfaces)
//!
//! The sync engine talks to the outside world only through these traits.
//!
//! - [`IRemoteStore`] - Remote file API (listing, streamed transfer, delete)
//! - [`ILocalFileSystem`] - Local filesystem walk, streamed I/O and metadata

pub mod local_filesystem;
pub mod remote_store;

pub use local_filesystem::{
    FileSystemState, FsError, ILocalFileSystem, WalkOutcome, WalkedEntry, WriteOutcome,
};
pub use remote_store::{ByteReader, IRemoteStore, RemoteItem, TransportError, UploadReceipt};
