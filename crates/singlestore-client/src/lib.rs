//! # singlestore-client
//!
//! Async session engine for SingleStore and other MySQL-protocol servers.
//!
//! A [`Session`] is one authenticated connection. It owns the payload
//! handler, runs the connect and authentication sequence, and executes
//! commands under a small state machine that also coordinates out-of-band
//! cancellation.
//!
//! ## Features
//!
//! - **Transports**: TCP across several hosts, Unix sockets, Windows named pipes
//! - **TLS**: upgrade after the handshake, with a legacy-version retry
//! - **Authentication**: native, caching SHA-2 and SHA-256 passwords, plugin switches
//! - **Commands**: several statements or commands in one payload, stored procedures
//! - **Prepared statements**: cached per session with LRU eviction
//! - **Cancellation**: `KILL QUERY` on a side connection, safe against races
//!
//! ## Session states
//!
//! ```text
//! Created -> Connecting -> Connected <-> Querying <-> CancelingQuery
//!                              ^                           |
//!                              +-- ClearingPendingCancellation
//! Connected -> Closing -> Closed;  any state -> Failed
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use singlestore_client::{Command, Config, Credentials, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new()
//!         .host("localhost")
//!         .credentials(Credentials::new("root", "secret"))
//!         .database("app");
//!
//!     let mut session = Session::connect(config).await?;
//!
//!     let results = session
//!         .execute(&Command::new("SELECT name FROM users WHERE id = ?").bind(1))
//!         .await?;
//!     for row in &results[0].rows {
//!         println!("{:?}", row.get_str(0));
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod attributes;
pub mod cancel;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
mod metadata;
pub mod pool;
pub mod preparer;
pub mod procedure;
pub mod proxy;
pub mod result;
pub mod session;
pub mod sql;
pub mod state;
pub mod statement_cache;

// Re-export commonly used types
pub use cancel::CancelHandle;
pub use command::{Command, CommandListPosition, CommandType};
pub use config::{ClientCertificateProvider, Config, ConnectionProtocol, TimeoutConfig};
pub use dispatcher::ConcatenatedPayloadCreator;
pub use error::{Error, ErrorKind, Result, ServerError};
pub use mysql_protocol::{ServerVersion, TextRow};
pub use pool::{SessionOwner, SessionPool};
pub use preparer::{PreparedStatement, PreparedStatements};
pub use proxy::{AzureGatewayDetector, ProxyContext, ProxyDetector};
pub use result::ResultSet;
pub use session::Session;
pub use singlestore_auth::{Credentials, HostInfo, PasswordProvider};
pub use singlestore_tls::{ClientCertificate, SslMode, TlsConfig, TlsVersions};
pub use sql::{Parameter, Parameters, Value};
pub use state::SessionState;
pub use statement_cache::StatementCache;
