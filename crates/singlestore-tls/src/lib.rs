//! # singlestore-tls
//!
//! TLS negotiation layer for SingleStore connections.
//!
//! TLS is negotiated inside the MySQL handshake: the server advertises the
//! `SSL` capability in its initial handshake, the client answers with a short
//! SSL request, and both sides then run a TLS handshake on the same socket
//! before the client sends its real handshake response.
//!
//! ```text
//! TCP Connect → Initial Handshake (cleartext) → SSL Request → TLS Handshake → Handshake Response (encrypted)
//! ```
//!
//! ## SSL modes
//!
//! | Mode | Negotiate | Chain checked | Host name checked |
//! |---|---|---|---|
//! | `None` | never | - | - |
//! | `Preferred` | if offered | no | no |
//! | `Required` | always | no | no |
//! | `VerifyCa` | always | yes | no |
//! | `VerifyFull` | always | yes | yes |
//!
//! Trusted roots are the Mozilla bundle from `webpki-roots` plus any CA
//! bundle file, which may hold several concatenated PEM certificates.
//! Client certificates can come from a PEM pair or a PKCS#12 archive.
//!
//! ```rust,ignore
//! use singlestore_tls::{SslMode, TlsConfig, TlsConnector};
//!
//! let connector = TlsConnector::new(
//!     TlsConfig::new()
//!         .ssl_mode(SslMode::VerifyCa)
//!         .ca_file("/etc/ssl/certs/ca.pem"),
//! )?;
//! let tls_stream = connector.connect(tcp_stream, "db.example.com").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod certificates;
pub mod config;
pub mod connector;
pub mod error;
pub mod retry;
mod verifier;

pub use config::{ClientAuth, ClientCertificate, SslMode, TlsConfig, TlsVersions};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use retry::legacy_retry_versions;

// Re-export tokio-rustls stream type for convenience
pub use tokio_rustls::client::TlsStream;
