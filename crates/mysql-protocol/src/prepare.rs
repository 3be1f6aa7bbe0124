//! `COM_STMT_PREPARE` response header.

use bytes::Buf;

use crate::codec::{expect_u8, read_u16, read_u32, skip};
use crate::error::ProtocolError;
use crate::packet::sentinel;

/// The first payload of a successful prepare response.
///
/// It is followed by `parameter_count` parameter definitions and then
/// `column_count` column definitions, each group terminated by an EOF
/// payload unless `DEPRECATE_EOF` was negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Server-assigned statement id.
    pub statement_id: u32,
    /// Number of result columns.
    pub column_count: u16,
    /// Number of `?` parameters.
    pub parameter_count: u16,
    /// Warning count.
    pub warnings: u16,
}

impl StmtPrepareOk {
    /// Parse a prepare OK payload.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        expect_u8(src, sentinel::OK)?;
        let statement_id = read_u32(src)?;
        let column_count = read_u16(src)?;
        let parameter_count = read_u16(src)?;
        let mut warnings = 0;
        if src.has_remaining() {
            skip(src, 1)?;
            if src.remaining() >= 2 {
                warnings = read_u16(src)?;
            }
        }
        Ok(Self {
            statement_id,
            column_count,
            parameter_count,
            warnings,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let mut cursor: &[u8] = &[0x00, 7, 0, 0, 0, 2, 0, 1, 0, 0, 0, 0];
        let ok = StmtPrepareOk::decode(&mut cursor).unwrap();
        assert_eq!(ok.statement_id, 7);
        assert_eq!(ok.column_count, 2);
        assert_eq!(ok.parameter_count, 1);
        assert_eq!(ok.warnings, 0);
    }

    #[test]
    fn test_rejects_error_header() {
        let mut cursor: &[u8] = &[0xFF, 1, 0];
        assert!(StmtPrepareOk::decode(&mut cursor).is_err());
    }
}
