//! Client error types.

use mysql_protocol::ErrPacket;
use mysql_protocol::error_code::CLIENT_INTERACTION_TIMEOUT;
use singlestore_auth::{AuthError, BoxError};
use singlestore_codec::CodecError;
use singlestore_tls::TlsError;
use thiserror::Error;

/// An error payload sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServerError {
    /// Server error code.
    pub code: u16,
    /// Five-character SQL state.
    pub sql_state: String,
    /// Message text.
    pub message: String,
}

impl From<ErrPacket> for ServerError {
    fn from(packet: ErrPacket) -> Self {
        Self {
            code: packet.code,
            sql_state: packet.state,
            message: packet.message,
        }
    }
}

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No host could be reached, or the connection attempt failed.
    UnableToConnect,
    /// The server or the client rejected the credentials or auth method.
    Authentication,
    /// The server rejected the client certificate.
    CertificateRejected,
    /// TLS negotiation failed.
    Tls,
    /// The byte stream is no longer aligned with the protocol.
    ProtocolDesync,
    /// The transport failed.
    Io,
    /// The server returned an error payload.
    Server,
    /// A payload failed to send because it was larger than the server accepts.
    PacketTooLarge,
    /// The command was canceled.
    Canceled,
    /// The operation is not valid in the current session state.
    InvalidOperation,
    /// The session has been closed.
    Disposed,
    /// A user callback failed.
    CallbackFailed,
    /// A statement used the client-side `DELIMITER` command.
    DelimiterNotSupported,
    /// A timeout expired.
    Timeout,
    /// The configuration is invalid.
    Configuration,
    /// The server asked for something this client does not implement.
    NotSupported,
}

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting failed; `source` holds the underlying failure.
    #[error("{message}")]
    UnableToConnect {
        /// Description of the failure.
        message: String,
        /// Underlying failure, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// Authentication failed.
    #[error(transparent)]
    Authentication(#[from] AuthError),

    /// TLS error.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Protocol error while decoding a payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] mysql_protocol::ProtocolError),

    /// Codec error.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// IO error outside the codec, such as name resolution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// A large payload failed to send.
    #[error(
        "Error submitting {megabytes}MB packet; ensure 'max_allowed_packet' is greater than {megabytes}MB."
    )]
    PacketTooLarge {
        /// Payload size in millions of bytes, rounded down.
        megabytes: usize,
        /// The send failure.
        #[source]
        source: Box<Error>,
    },

    /// The command was canceled before or while it ran.
    #[error("Query execution was interrupted")]
    Canceled {
        /// The server error reporting the interruption, if any.
        #[source]
        source: Option<ServerError>,
    },

    /// The operation is not valid in the current state.
    #[error("{0}")]
    InvalidOperation(String),

    /// The session has been closed.
    #[error("Cannot access a disposed object. Object name: 'ServerSession'.")]
    Disposed,

    /// The client certificate callback failed.
    #[error("Failed to obtain client certificate via ProvideClientCertificatesCallback")]
    CertificateCallbackFailed(#[source] BoxError),

    /// The statement used the `DELIMITER` command.
    #[error("'DELIMITER' should not be used with SingleStoreConnector. See https://fl.vu/mysql-delimiter")]
    DelimiterNotSupported(#[source] ServerError),

    /// A timeout expired.
    #[error("{0}")]
    Timeout(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server asked for an unsupported feature.
    #[error("{0}")]
    NotSupported(String),
}

impl Error {
    /// Shorthand for [`Error::UnableToConnect`] without an underlying cause.
    pub(crate) fn unable_to_connect(message: impl Into<String>) -> Self {
        Self::UnableToConnect {
            message: message.into(),
            source: None,
        }
    }

    /// The error's classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnableToConnect { .. } => ErrorKind::UnableToConnect,
            Self::Authentication(AuthError::CallbackFailed(_)) => ErrorKind::CallbackFailed,
            Self::Authentication(AuthError::Protocol(_)) => ErrorKind::ProtocolDesync,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Tls(TlsError::ClientCertificateRejected(_)) => ErrorKind::CertificateRejected,
            Self::Tls(TlsError::ServerDoesNotSupportSsl) => ErrorKind::UnableToConnect,
            Self::Tls(
                TlsError::CaFileNotFound(_)
                | TlsError::CertificateFileNotFound(_)
                | TlsError::Configuration(_),
            ) => ErrorKind::Configuration,
            Self::Tls(_) => ErrorKind::Tls,
            Self::Protocol(_) => ErrorKind::ProtocolDesync,
            Self::Codec(CodecError::Timeout) => ErrorKind::Timeout,
            Self::Codec(e) if e.is_io() => ErrorKind::Io,
            Self::Codec(_) => ErrorKind::ProtocolDesync,
            Self::Io(_) => ErrorKind::Io,
            Self::Server(_) => ErrorKind::Server,
            Self::PacketTooLarge { .. } => ErrorKind::PacketTooLarge,
            Self::Canceled { .. } => ErrorKind::Canceled,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::Disposed => ErrorKind::Disposed,
            Self::CertificateCallbackFailed(_) => ErrorKind::CallbackFailed,
            Self::DelimiterNotSupported(_) => ErrorKind::DelimiterNotSupported,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::Configuration,
            Self::NotSupported(_) => ErrorKind::NotSupported,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Transient errors include timeouts, transport failures, failed
    /// connection attempts and the server closing an idle session.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self.kind() {
            ErrorKind::Io | ErrorKind::Timeout | ErrorKind::UnableToConnect => true,
            ErrorKind::Server => self.server_error_code() == Some(CLIENT_INTERACTION_TIMEOUT),
            _ => false,
        }
    }

    /// Check if the command was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Check if this error means the byte stream can no longer be trusted.
    ///
    /// A desynchronized session must be discarded.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        self.kind() == ErrorKind::ProtocolDesync
    }

    /// Check if this is a server error with a specific code.
    #[must_use]
    pub fn is_server_error(&self, code: u16) -> bool {
        self.server_error_code() == Some(code)
    }

    /// The server error code, if the server reported this error.
    #[must_use]
    pub fn server_error_code(&self) -> Option<u16> {
        self.server_error().map(|e| e.code)
    }

    /// The server error, if the server reported this error.
    #[must_use]
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(e) | Self::DelimiterNotSupported(e) => Some(e),
            Self::Canceled { source } => source.as_ref(),
            _ => None,
        }
    }

    /// Whether this error came from the transport.
    #[must_use]
    pub(crate) fn is_io(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mysql_protocol::error_code::QUERY_INTERRUPTED;

    fn server(code: u16) -> ServerError {
        ServerError {
            code,
            sql_state: "HY000".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::Disposed.kind(), ErrorKind::Disposed);
        assert_eq!(
            Error::Codec(CodecError::ConnectionClosed).kind(),
            ErrorKind::Io
        );
        assert_eq!(Error::Codec(CodecError::Timeout).kind(), ErrorKind::Timeout);
        assert_eq!(
            Error::Codec(CodecError::PacketOutOfOrder {
                expected: 1,
                actual: 3
            })
            .kind(),
            ErrorKind::ProtocolDesync
        );
        assert_eq!(
            Error::Tls(TlsError::ServerDoesNotSupportSsl).kind(),
            ErrorKind::UnableToConnect
        );
        assert_eq!(
            Error::Authentication(AuthError::CallbackFailed("x".into())).kind(),
            ErrorKind::CallbackFailed
        );
        assert_eq!(
            Error::Authentication(AuthError::UnsupportedPlugin("dialog".into())).kind(),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn test_server_error_helpers() {
        let err = Error::Server(server(QUERY_INTERRUPTED));
        assert!(err.is_server_error(QUERY_INTERRUPTED));
        assert_eq!(err.server_error_code(), Some(1317));
        assert!(!err.is_transient());
        assert!(Error::Server(server(CLIENT_INTERACTION_TIMEOUT)).is_transient());

        let canceled = Error::Canceled {
            source: Some(server(QUERY_INTERRUPTED)),
        };
        assert!(canceled.is_canceled());
        assert_eq!(canceled.server_error_code(), Some(QUERY_INTERRUPTED));
    }

    #[test]
    fn test_packet_too_large_message() {
        let err = Error::PacketTooLarge {
            megabytes: 5,
            source: Box::new(Error::Codec(CodecError::ConnectionClosed)),
        };
        assert_eq!(
            err.to_string(),
            "Error submitting 5MB packet; ensure 'max_allowed_packet' is greater than 5MB."
        );
        assert_eq!(err.kind(), ErrorKind::PacketTooLarge);
    }

    #[test]
    fn test_err_packet_conversion() {
        let mut cursor: &[u8] = b"\xFF\x15\x04#28000Access denied";
        let server: ServerError = ErrPacket::decode(&mut cursor).unwrap().into();
        assert_eq!(server.code, 1045);
        assert_eq!(server.sql_state, "28000");
        assert_eq!(Error::from(server).to_string(), "Access denied");
    }
}
