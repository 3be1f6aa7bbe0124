//! Byte arena for column and parameter definitions.
//!
//! Definition payloads are appended to one growable buffer. Taking the
//! definitions freezes the filled part into a single shared allocation and
//! parses each definition over a slice of it; the buffer keeps its spare
//! capacity for the next result set.

use std::ops::Range;

use bytes::BytesMut;
use mysql_protocol::ColumnDefinition;

use crate::error::Result;

#[derive(Debug, Default)]
pub(crate) struct MetadataArena {
    buffer: BytesMut,
    ranges: Vec<Range<usize>>,
}

impl MetadataArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append one definition payload.
    pub(crate) fn push(&mut self, payload: &[u8]) {
        let start = self.buffer.len();
        self.buffer.extend_from_slice(payload);
        self.ranges.push(start..self.buffer.len());
    }

    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Drop every appended definition, keeping the buffer's capacity.
    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
        self.ranges.clear();
    }

    /// Parse every appended definition and reset the arena.
    pub(crate) fn take(&mut self) -> Result<Vec<ColumnDefinition>> {
        let bytes = self.buffer.split().freeze();
        self.ranges
            .drain(..)
            .map(|range| Ok(ColumnDefinition::parse(bytes.slice(range))?))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mysql_protocol::column::encode_column_definition;
    use mysql_protocol::{ColumnFlags, ColumnType};

    fn definition(name: &str, character_set: u16, column_type: ColumnType) -> Bytes {
        encode_column_definition("app", "t", name, character_set, 11, column_type, ColumnFlags::empty(), 0)
    }

    #[test]
    fn test_definitions_share_one_allocation() {
        let mut arena = MetadataArena::new();
        let a = definition("id", 63, ColumnType::LONG);
        let b = definition("name", 45, ColumnType::VAR_STRING);
        arena.push(&a);
        arena.push(&b);
        assert_eq!(arena.len(), 2);

        let columns = arena.take().unwrap();
        assert_eq!(arena.len(), 0);
        assert_eq!(columns[0].name().unwrap(), "id");
        assert_eq!(columns[1].name().unwrap(), "name");
        assert_eq!(columns[1].column_type, ColumnType::VAR_STRING);
        // Both definitions are views into the same buffer.
        let first = columns[0].raw().as_ptr() as usize;
        let second = columns[1].raw().as_ptr() as usize;
        assert_eq!(second - first, a.len());
    }

    #[test]
    fn test_reuse_after_take() {
        let mut arena = MetadataArena::new();
        arena.push(&definition("x", 63, ColumnType::TINY));
        assert_eq!(arena.take().unwrap().len(), 1);
        assert!(arena.take().unwrap().is_empty());
        arena.push(&definition("y", 63, ColumnType::TINY));
        assert_eq!(arena.take().unwrap()[0].name().unwrap(), "y");
    }

    #[test]
    fn test_clear_discards_partial_definitions() {
        let mut arena = MetadataArena::new();
        arena.push(&definition("stale", 63, ColumnType::TINY));
        arena.clear();
        assert_eq!(arena.len(), 0);
        arena.push(&definition("fresh", 63, ColumnType::TINY));
        let columns = arena.take().unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name().unwrap(), "fresh");
    }
}
