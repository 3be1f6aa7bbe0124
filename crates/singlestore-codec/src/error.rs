//! Codec error types.

use std::sync::Arc;

use mysql_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while framing payloads over a transport.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The underlying transport failed.
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// A header could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A packet arrived with an unexpected sequence number.
    #[error("packet received out-of-order: expected sequence {expected}, got {actual}")]
    PacketOutOfOrder {
        /// The expected sequence number.
        expected: u8,
        /// The sequence number that arrived.
        actual: u8,
    },

    /// The stream ended in the middle of a packet or payload.
    #[error("expected to read {expected} header/payload bytes but only received {read}")]
    EndOfStream {
        /// Bytes that were required.
        expected: usize,
        /// Bytes that had been received.
        read: usize,
    },

    /// The peer closed the connection between payloads.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// A compressed frame could not be inflated or deflated.
    #[error("compression error: {0}")]
    Compression(String),

    /// The remaining timeout expired during a read or write.
    #[error("operation timed out")]
    Timeout,

    /// Bytes were buffered at the point where the transport was swapped.
    #[error("{0} unread bytes buffered before transport swap")]
    BufferedDataAtSwap(usize),
}

impl CodecError {
    /// Whether this error leaves the byte stream in an unknown position.
    #[must_use]
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::PacketOutOfOrder { .. }
                | Self::EndOfStream { .. }
                | Self::Compression(_)
                | Self::BufferedDataAtSwap(_)
        )
    }

    /// Whether this error came from the transport.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
