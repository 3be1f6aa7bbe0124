//! Protocol-level error types.

use thiserror::Error;

/// Errors that can occur while decoding or encoding protocol payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The payload ended before a complete field could be read.
    #[error("unexpected end of payload: expected {expected} bytes, {actual} remaining")]
    UnexpectedEof {
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes that were available.
        actual: usize,
    },

    /// A fixed marker byte did not have the expected value.
    #[error("expected byte 0x{expected:02X} but got 0x{actual:02X}")]
    UnexpectedByte {
        /// The expected byte.
        expected: u8,
        /// The byte that was read.
        actual: u8,
    },

    /// The payload was empty where a header byte was required.
    #[error("empty payload")]
    EmptyPayload,

    /// The handshake used a protocol version other than 10.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    /// A payload contained bytes after its last field.
    #[error("{0} extra bytes at end of payload")]
    ExtraBytes(usize),

    /// A length-encoded integer used a reserved prefix.
    #[error("invalid length-encoded integer prefix 0x{0:02X}")]
    InvalidLengthEncoding(u8),

    /// A NULL marker appeared where a value was required.
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// A length exceeds what the wire format can carry.
    #[error("length {length} exceeds maximum {max}")]
    LengthOverflow {
        /// The offending length.
        length: usize,
        /// The maximum allowed.
        max: usize,
    },

    /// A column definition did not carry the fixed-length field marker.
    #[error("invalid column definition: {0}")]
    InvalidColumnDefinition(&'static str),
}
