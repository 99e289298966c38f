//! Integration tests entrypoint for client connections, dispatch and sync

#[path = "support/mod.rs"]
mod support;

#[path = "integration/client_ws_test.rs"]
mod client_ws_test;

#[path = "integration/dispatch_flow_test.rs"]
mod dispatch_flow_test;

#[path = "integration/sync_api_test.rs"]
mod sync_api_test;
