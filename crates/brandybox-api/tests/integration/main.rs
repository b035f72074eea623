//! Integration tests for brandybox-api
//!
//! Uses wiremock to simulate the Brandy Box server and verifies the
//! client and the remote store adapter end to end.

mod common;

mod test_client;
mod test_remote_store;
