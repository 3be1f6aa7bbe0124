//! TLS-related error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    /// TLS was required but the server does not advertise it.
    #[error("Server does not support SSL")]
    ServerDoesNotSupportSsl,

    /// The TLS handshake failed authentication (server certificate rejected,
    /// handshake alert, or similar).
    #[error("SSL Authentication Error")]
    Authentication(#[source] std::io::Error),

    /// The server closed the connection after receiving the client certificate.
    #[error("SingleStore Server rejected client certificate")]
    ClientCertificateRejected(#[source] std::io::Error),

    /// The server and client have no TLS version in common.
    #[error("The server doesn't support the client's specified TLS versions.")]
    UnsupportedVersions(#[source] std::io::Error),

    /// None of the configured TLS versions can be negotiated by this client.
    #[error("All specified TLS versions are incompatible with this platform.")]
    NoCompatibleVersions,

    /// The CA bundle file does not exist.
    #[error("Cannot find CA Certificate File: {}", .0.display())]
    CaFileNotFound(PathBuf),

    /// The CA bundle file exists but could not be read.
    #[error("Could not load CA Certificate File: {}", .path.display())]
    CaFileUnreadable {
        /// Path of the bundle.
        path: PathBuf,
        /// Underlying read error.
        #[source]
        source: std::io::Error,
    },

    /// The client certificate file does not exist.
    #[error("Cannot find Certificate File: {}", .0.display())]
    CertificateFileNotFound(PathBuf),

    /// A PKCS#12 file could not be decrypted or parsed.
    #[error("Either the Certificate Password is incorrect or the Certificate File is invalid: {0}")]
    InvalidPkcs12(String),

    /// A PKCS#12 file has no private key.
    #[error(
        "CertificateFile does not contain a private key. CertificateFile should be in PKCS #12 (.pfx) format and contain both a Certificate and Private Key"
    )]
    MissingPrivateKey,

    /// Invalid certificate format.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Invalid private key format.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// The host name cannot be used for SNI or verification.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Rustls error.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// IO error during TLS operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// Whether this failure happened during the handshake itself rather than
    /// while preparing the configuration.
    #[must_use]
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_)
                | Self::ClientCertificateRejected(_)
                | Self::UnsupportedVersions(_)
                | Self::Io(_)
        )
    }
}
