//! Column definition payloads.
//!
//! The fixed-width fields of a column definition are decoded eagerly; the six
//! name strings are decoded from the retained payload bytes the first time any
//! of them is requested.

use bitflags::bitflags;
use bytes::Bytes;
use once_cell::sync::OnceCell;

use crate::codec::{expect_u8, read_lenenc_bytes, read_u16, read_u32, read_u8, skip_lenenc_bytes};
use crate::error::ProtocolError;

/// Length of the fixed-width field block, always `0x0C`.
const FIXED_FIELDS_LENGTH: u8 = 0x0C;

/// Character set (collation) ids used by the client.
pub mod charset {
    /// `utf8_general_ci`.
    pub const UTF8_GENERAL_CI: u8 = 33;
    /// `utf8mb4_general_ci`.
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    /// `binary`.
    pub const BINARY: u8 = 63;
}

/// Column type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnType(u8);

impl ColumnType {
    /// `DECIMAL`.
    pub const DECIMAL: Self = Self(0x00);
    /// `TINYINT`.
    pub const TINY: Self = Self(0x01);
    /// `SMALLINT`.
    pub const SHORT: Self = Self(0x02);
    /// `INT`.
    pub const LONG: Self = Self(0x03);
    /// `FLOAT`.
    pub const FLOAT: Self = Self(0x04);
    /// `DOUBLE`.
    pub const DOUBLE: Self = Self(0x05);
    /// `NULL`.
    pub const NULL: Self = Self(0x06);
    /// `TIMESTAMP`.
    pub const TIMESTAMP: Self = Self(0x07);
    /// `BIGINT`.
    pub const LONGLONG: Self = Self(0x08);
    /// `MEDIUMINT`.
    pub const INT24: Self = Self(0x09);
    /// `DATE`.
    pub const DATE: Self = Self(0x0A);
    /// `TIME`.
    pub const TIME: Self = Self(0x0B);
    /// `DATETIME`.
    pub const DATETIME: Self = Self(0x0C);
    /// `YEAR`.
    pub const YEAR: Self = Self(0x0D);
    /// `VARCHAR`.
    pub const VARCHAR: Self = Self(0x0F);
    /// `BIT`.
    pub const BIT: Self = Self(0x10);
    /// `JSON`.
    pub const JSON: Self = Self(0xF5);
    /// `DECIMAL` (new format).
    pub const NEW_DECIMAL: Self = Self(0xF6);
    /// `ENUM`.
    pub const ENUM: Self = Self(0xF7);
    /// `SET`.
    pub const SET: Self = Self(0xF8);
    /// `TINYBLOB`.
    pub const TINY_BLOB: Self = Self(0xF9);
    /// `MEDIUMBLOB`.
    pub const MEDIUM_BLOB: Self = Self(0xFA);
    /// `LONGBLOB`.
    pub const LONG_BLOB: Self = Self(0xFB);
    /// `BLOB`.
    pub const BLOB: Self = Self(0xFC);
    /// `VARBINARY` / `VARCHAR`.
    pub const VAR_STRING: Self = Self(0xFD);
    /// `BINARY` / `CHAR`.
    pub const STRING: Self = Self(0xFE);
    /// `GEOMETRY`.
    pub const GEOMETRY: Self = Self(0xFF);

    /// Create a column type from its wire code.
    #[must_use]
    pub const fn new(code: u8) -> Self {
        Self(code)
    }

    /// The wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }
}

bitflags! {
    /// Column definition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColumnFlags: u16 {
        /// `NOT NULL`.
        const NOT_NULL = 0x0001;
        /// Part of the primary key.
        const PRIMARY_KEY = 0x0002;
        /// Part of a unique key.
        const UNIQUE_KEY = 0x0004;
        /// Part of a non-unique key.
        const MULTIPLE_KEY = 0x0008;
        /// BLOB or TEXT.
        const BLOB = 0x0010;
        /// Unsigned number.
        const UNSIGNED = 0x0020;
        /// Zero-filled number.
        const ZERO_FILL = 0x0040;
        /// Binary collation.
        const BINARY = 0x0080;
        /// ENUM.
        const ENUM = 0x0100;
        /// Auto increment.
        const AUTO_INCREMENT = 0x0200;
        /// TIMESTAMP.
        const TIMESTAMP = 0x0400;
        /// SET.
        const SET = 0x0800;
    }
}

/// The name strings of a column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    /// Catalog, always `def`.
    pub catalog: String,
    /// Schema (database) name.
    pub schema: String,
    /// Table alias.
    pub table: String,
    /// Underlying table name.
    pub physical_table: String,
    /// Column alias.
    pub name: String,
    /// Underlying column name.
    pub physical_name: String,
}

/// A column (or parameter) definition.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    raw: Bytes,
    names: OnceCell<ColumnNames>,
    /// Character set of the column.
    pub character_set: u16,
    /// Maximum column length in bytes.
    pub column_length: u32,
    /// Column type.
    pub column_type: ColumnType,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Number of decimals.
    pub decimals: u8,
}

impl ColumnDefinition {
    /// Parse a column definition, retaining `raw` for lazy name decoding.
    ///
    /// `raw` is usually a slice of a larger buffer holding several definitions.
    pub fn parse(raw: Bytes) -> Result<Self, ProtocolError> {
        let mut src = raw.clone();
        for _ in 0..6 {
            skip_lenenc_bytes(&mut src)?;
        }
        expect_u8(&mut src, FIXED_FIELDS_LENGTH)?;
        let character_set = read_u16(&mut src)?;
        let column_length = read_u32(&mut src)?;
        let column_type = ColumnType(read_u8(&mut src)?);
        let flags = ColumnFlags::from_bits_retain(read_u16(&mut src)?);
        let decimals = read_u8(&mut src)?;
        expect_u8(&mut src, 0)?;
        expect_u8(&mut src, 0)?;

        Ok(Self {
            raw,
            names: OnceCell::new(),
            character_set,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    /// The name strings, decoded on first use.
    pub fn names(&self) -> Result<&ColumnNames, ProtocolError> {
        self.names.get_or_try_init(|| {
            let mut src = self.raw.clone();
            let mut next = || -> Result<String, ProtocolError> {
                let bytes = read_lenenc_bytes(&mut src)?.unwrap_or_default();
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            };
            Ok(ColumnNames {
                catalog: next()?,
                schema: next()?,
                table: next()?,
                physical_table: next()?,
                name: next()?,
                physical_name: next()?,
            })
        })
    }

    /// The column alias.
    pub fn name(&self) -> Result<&str, ProtocolError> {
        self.names().map(|n| n.name.as_str())
    }

    /// Whether the column holds binary data.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.character_set == u16::from(charset::BINARY)
    }

    /// The retained payload bytes.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Whether the names have been decoded yet.
    #[must_use]
    pub fn names_decoded(&self) -> bool {
        self.names.get().is_some()
    }
}

/// Build a column definition payload (used by servers and tests).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn encode_column_definition(
    schema: &str,
    table: &str,
    name: &str,
    character_set: u16,
    column_length: u32,
    column_type: ColumnType,
    flags: ColumnFlags,
    decimals: u8,
) -> Bytes {
    use crate::codec::write_lenenc_bytes;
    use bytes::{BufMut, BytesMut};

    let mut buf = BytesMut::with_capacity(32 + schema.len() + 2 * (table.len() + name.len()));
    write_lenenc_bytes(&mut buf, b"def");
    write_lenenc_bytes(&mut buf, schema.as_bytes());
    write_lenenc_bytes(&mut buf, table.as_bytes());
    write_lenenc_bytes(&mut buf, table.as_bytes());
    write_lenenc_bytes(&mut buf, name.as_bytes());
    write_lenenc_bytes(&mut buf, name.as_bytes());
    buf.put_u8(FIXED_FIELDS_LENGTH);
    buf.put_u16_le(character_set);
    buf.put_u32_le(column_length);
    buf.put_u8(column_type.code());
    buf.put_u16_le(flags.bits());
    buf.put_u8(decimals);
    buf.put_u16_le(0);
    buf.freeze()
}
