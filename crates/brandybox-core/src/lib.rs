//! Brandy Box Core - Domain types, configuration and ports
//!
//! This crate holds everything the sync engine and its adapters share:
//! - **Domain types** - `RelativePath`, `ContentHash`, snapshots, `SyncedEntry`
//! - **Port definitions** - `IRemoteStore` and `ILocalFileSystem`
//! - **Configuration** - YAML-backed `Config` with validation
//!
//! # Architecture
//!
//! The engine in `brandybox-sync` depends only on the ports defined here.
//! The HTTP adapter (`brandybox-api`) and the local filesystem adapter
//! implement them, so the engine can be exercised against in-memory fakes.

pub mod config;
pub mod domain;
pub mod ports;
