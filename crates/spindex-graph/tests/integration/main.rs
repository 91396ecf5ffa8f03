//! Integration tests for spindex-graph
//!
//! Uses wiremock to simulate the Graph API, the SharePoint REST API and both
//! identity endpoints, and verifies the behavior of the API sessions and the
//! endpoint catalogue end to end.


mod test_session;
mod test_token;
