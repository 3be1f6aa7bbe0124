//! Text protocol result rows.

use bytes::{Buf, Bytes};

use crate::codec::read_lenenc_bytes;
use crate::error::ProtocolError;

/// One row of a text result set; `None` is SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRow {
    values: Vec<Option<Bytes>>,
}

impl TextRow {
    /// Parse a row with `column_count` values.
    pub fn decode(src: &mut impl Buf, column_count: usize) -> Result<Self, ProtocolError> {
        let mut values = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            values.push(read_lenenc_bytes(src)?);
        }
        if src.has_remaining() {
            return Err(ProtocolError::ExtraBytes(src.remaining()));
        }
        Ok(Self { values })
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`; `None` if out of range or NULL.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Value at `index` as UTF-8 text.
    #[must_use]
    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(|b| core::str::from_utf8(b).ok())
    }

    /// Value at `index` parsed as a signed integer.
    #[must_use]
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get_str(index).and_then(|s| s.parse().ok())
    }

    /// All values.
    #[must_use]
    pub fn values(&self) -> &[Option<Bytes>] {
        &self.values
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_null() {
        let mut cursor: &[u8] = b"\x0242\xFB\x058.1.2";
        let row = TextRow::decode(&mut cursor, 3).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get_i64(0), Some(42));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get_str(2), Some("8.1.2"));
        assert_eq!(row.get(3), None);
    }

    #[test]
    fn test_column_count_mismatch() {
        let mut cursor: &[u8] = b"\x011\x012";
        assert_eq!(
            TextRow::decode(&mut cursor, 1),
            Err(ProtocolError::ExtraBytes(2))
        );
        let mut cursor: &[u8] = b"\x011";
        assert!(TextRow::decode(&mut cursor, 2).is_err());
    }
}
