//! Integration tests for spindex-sync
//!
//! Uses wiremock to serve a small SharePoint Online tenant and verifies the
//! walker's emission order, access control propagation, cursor handling,
//! content downloads and both sinks end to end.

mod common;

mod test_content;
mod test_sink;
