//! Generic server response payloads: OK, ERR, EOF and local infile requests.

use bytes::{Buf, Bytes};

use crate::capabilities::ServerStatus;
use crate::codec::{expect_u8, read_lenenc_int_non_null, read_u16, read_u8};
use crate::error::ProtocolError;
use crate::packet::sentinel;

/// SQL state used when an error payload carries none.
pub const DEFAULT_SQL_STATE: &str = "HY000";

/// A server error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Server error code.
    pub code: u16,
    /// Five-character SQL state.
    pub state: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrPacket {
    /// Parse an error payload.
    ///
    /// When the byte after the code is not `#` there is no SQL state: the
    /// state defaults to `HY000` and that byte starts the message.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        expect_u8(src, sentinel::ERROR)?;
        let code = read_u16(src)?;
        let marker = read_u8(src)?;
        let (state, message) = if marker == b'#' {
            if src.remaining() < 5 {
                return Err(ProtocolError::UnexpectedEof {
                    expected: 5,
                    actual: src.remaining(),
                });
            }
            let state = src.copy_to_bytes(5);
            let message = src.copy_to_bytes(src.remaining());
            (
                String::from_utf8_lossy(&state).into_owned(),
                String::from_utf8_lossy(&message).into_owned(),
            )
        } else {
            let mut message = vec![marker];
            message.extend_from_slice(&src.copy_to_bytes(src.remaining()));
            (
                DEFAULT_SQL_STATE.to_string(),
                String::from_utf8_lossy(&message).into_owned(),
            )
        };
        Ok(Self {
            code,
            state,
            message,
        })
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    /// Rows affected by the statement.
    pub affected_rows: u64,
    /// Last generated insert id.
    pub last_insert_id: u64,
    /// Server status flags.
    pub status: ServerStatus,
    /// Warning count.
    pub warnings: u16,
    /// Trailing info and session state data, undecoded.
    pub info: Bytes,
}

impl OkPacket {
    /// Parse an OK payload (header `0x00`, or `0xFE` when it replaces an EOF).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let header = read_u8(src)?;
        if header != sentinel::OK && header != sentinel::EOF {
            return Err(ProtocolError::UnexpectedByte {
                expected: sentinel::OK,
                actual: header,
            });
        }
        let affected_rows = read_lenenc_int_non_null(src)?;
        let last_insert_id = read_lenenc_int_non_null(src)?;
        let (status, warnings) = if src.remaining() >= 4 {
            (ServerStatus::from_bits_retain(read_u16(src)?), read_u16(src)?)
        } else {
            (ServerStatus::empty(), 0)
        };
        let info = src.copy_to_bytes(src.remaining());
        Ok(Self {
            affected_rows,
            last_insert_id,
            status,
            warnings,
            info,
        })
    }
}

/// A legacy end-of-rows marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    /// Warning count.
    pub warnings: u16,
    /// Server status flags.
    pub status: ServerStatus,
}

impl EofPacket {
    /// Whether a payload is a legacy EOF (header `0xFE`, shorter than 9 bytes).
    #[must_use]
    pub fn is_eof(payload: &[u8]) -> bool {
        payload.first() == Some(&sentinel::EOF) && payload.len() < 9
    }

    /// Parse an EOF payload.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        expect_u8(src, sentinel::EOF)?;
        if src.remaining() < 4 {
            return Ok(Self {
                warnings: 0,
                status: ServerStatus::empty(),
            });
        }
        let warnings = read_u16(src)?;
        let status = ServerStatus::from_bits_retain(read_u16(src)?);
        Ok(Self { warnings, status })
    }
}

/// A server request for the client to upload a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInfileRequest {
    /// Name of the file the server requested.
    pub file_name: String,
}

impl LocalInfileRequest {
    /// Parse a local infile request.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        expect_u8(src, sentinel::LOCAL_INFILE)?;
        let name = src.copy_to_bytes(src.remaining());
        Ok(Self {
            file_name: String::from_utf8_lossy(&name).into_owned(),
        })
    }
}
