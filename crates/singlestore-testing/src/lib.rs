//! # singlestore-testing
//!
//! Test infrastructure for the SingleStore session engine.
//!
//! This crate provides an in-process mock server speaking the MySQL
//! client/server protocol, so sessions can be exercised over real TCP
//! without a database instance.
//!
//! ## Features
//!
//! - Handshake with `caching_sha2_password` or `mysql_native_password`
//! - SSL request and TLS upgrade with a generated self-signed certificate
//! - Compressed framing and an optional Unix domain socket listener
//! - Canned responses per statement, `KILL QUERY` between connections
//! - A log of received commands for assertions
//!
//! ## Example
//!
//! ```rust,ignore
//! use singlestore_client::{Command, Session};
//! use singlestore_testing::{MockResponse, MockServer};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockServer::builder()
//!         .with_response("SELECT name FROM users", MockResponse::scalar_string("Alice"))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let mut session = Session::connect(server.session_config()).await.unwrap();
//!     let results = session.execute(&Command::new("SELECT name FROM users")).await.unwrap();
//!     assert_eq!(results[0].rows[0].get_str(0), Some("Alice"));
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{
    CACHING_SHA2_PASSWORD, CLEAR_PASSWORD, MockColumn, MockResponse, MockServer, MockServerBuilder,
    MockServerConfig, MockServerError, NATIVE_PASSWORD, ReceivedCommand, RecordedCommand,
};
