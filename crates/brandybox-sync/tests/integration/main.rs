//! Integration tests for brandybox-sync
//!
//! Full cycles against a real temporary sync root and an in-memory
//! remote store.

mod common;

mod test_cycle;
mod test_deletions;
mod test_transfers;
