//! Domain types for Brandy Box
//!
//! - Validated newtypes for relative paths, content hashes and cycle ids
//! - Snapshot entries for both sides of a sync
//! - The verified `SyncedEntry` record kept by the state store

pub mod entry;
pub mod errors;
pub mod newtypes;

pub use entry::{
    EntryKind, Fingerprint, LocalEntry, LocalSnapshot, RemoteEntry, RemoteSnapshot, SyncedEntry,
};
pub use errors::DomainError;
pub use newtypes::*;
