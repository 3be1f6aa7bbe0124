//! Reading text-protocol results.

use bytes::Bytes;
use mysql_protocol::codec::read_lenenc_int_non_null;
use mysql_protocol::{
    ColumnDefinition, EofPacket, LocalInfileRequest, MAX_PACKET_SIZE, OkPacket, PayloadKind,
    ProtocolError, ServerStatus, TextRow, sentinel,
};

use crate::error::{Error, Result};
use crate::session::Session;

/// One result of a command: a row set or an update count.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ResultSet {
    /// Column definitions; empty for statements that return no rows.
    pub columns: Vec<ColumnDefinition>,
    /// Rows in text format.
    pub rows: Vec<TextRow>,
    /// Rows affected by the statement.
    pub affected_rows: u64,
    /// Last generated insert id.
    pub last_insert_id: u64,
    /// Warning count.
    pub warnings: u16,
    /// Server status after this result.
    pub status: ServerStatus,
}

impl ResultSet {
    fn from_ok(ok: &OkPacket) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
            status: ok.status,
        }
    }

    /// Whether this result carries rows.
    #[must_use]
    pub fn has_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Index of the column named `name`, compared case-insensitively.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| {
            column
                .name()
                .is_ok_and(|column_name| column_name.eq_ignore_ascii_case(name))
        })
    }

    /// First column of the first row as an integer.
    #[must_use]
    pub fn scalar_i64(&self) -> Option<i64> {
        self.rows.first().and_then(|row| row.get_i64(0))
    }

    fn has_more_results(&self) -> bool {
        self.status.contains(ServerStatus::MORE_RESULTS_EXIST)
    }
}

/// Whether a payload ends a row stream.
///
/// With deprecated EOF the terminator is an OK packet with header `0xFE`,
/// which can only be told apart from a row starting with a length-encoded
/// 8-byte integer by its length.
pub(crate) fn is_end_of_rows(payload: &[u8], deprecate_eof: bool) -> bool {
    payload.first() == Some(&sentinel::EOF)
        && (payload.len() < 9 || (deprecate_eof && payload.len() < MAX_PACKET_SIZE))
}

/// Warnings and status from a row stream terminator.
fn end_of_rows(payload: &Bytes, deprecate_eof: bool) -> Result<(u16, ServerStatus)> {
    if deprecate_eof {
        let ok = OkPacket::decode(&mut payload.clone())?;
        Ok((ok.warnings, ok.status))
    } else {
        let eof = EofPacket::decode(&mut payload.clone())?;
        Ok((eof.warnings, eof.status))
    }
}

impl Session {
    /// Read every result of the command just sent.
    pub(crate) async fn receive_results(&mut self) -> Result<Vec<ResultSet>> {
        let first = self.receive_reply().await?;
        self.read_results(first).await
    }

    /// Read every result set, starting from the command's first reply.
    pub(crate) async fn read_results(&mut self, first: Bytes) -> Result<Vec<ResultSet>> {
        let mut results = Vec::new();
        let mut payload = first;
        loop {
            let result = self.read_result_set(payload).await?;
            let more = result.has_more_results();
            results.push(result);
            if !more {
                return Ok(results);
            }
            payload = self.receive_reply().await?;
        }
    }

    async fn read_result_set(&mut self, payload: Bytes) -> Result<ResultSet> {
        match PayloadKind::classify(&payload) {
            PayloadKind::Ok => {
                let ok = self.verify_ok(&payload)?;
                Ok(ResultSet::from_ok(&ok))
            }
            PayloadKind::LocalInfile => self.reject_local_infile(&payload).await,
            _ => {
                let column_count = read_lenenc_int_non_null(&mut payload.clone())?;
                let columns = self.read_definitions(column_count as usize).await?;
                let deprecate_eof = self.supports_deprecate_eof();
                let mut rows = Vec::new();
                loop {
                    let payload = self.receive_reply().await?;
                    if is_end_of_rows(&payload, deprecate_eof) {
                        let (warnings, status) = end_of_rows(&payload, deprecate_eof)?;
                        self.no_backslash_escapes =
                            status.contains(ServerStatus::NO_BACKSLASH_ESCAPES);
                        tracing::trace!(columns = columns.len(), rows = rows.len(), "read result set");
                        return Ok(ResultSet {
                            columns,
                            rows,
                            affected_rows: 0,
                            last_insert_id: 0,
                            warnings,
                            status,
                        });
                    }
                    rows.push(TextRow::decode(&mut payload.clone(), columns.len())?);
                }
            }
        }
    }

    /// Read `count` definition payloads into the metadata arena.
    ///
    /// The arena is left empty whether or not the read succeeds.
    pub(crate) async fn read_definitions(&mut self, count: usize) -> Result<Vec<ColumnDefinition>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if let Err(err) = self.receive_definitions(count).await {
            self.arena.clear();
            return Err(err);
        }
        self.arena.take()
    }

    async fn receive_definitions(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let payload = self.receive_reply().await?;
            self.arena.push(&payload);
        }
        tracing::trace!(count = self.arena.len(), "read definitions");
        if !self.supports_deprecate_eof() {
            let payload = self.receive_reply().await?;
            if !EofPacket::is_eof(&payload) {
                return Err(ProtocolError::UnexpectedByte {
                    expected: sentinel::EOF,
                    actual: payload.first().copied().unwrap_or_default(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Decline a `LOAD DATA LOCAL INFILE` request by sending an empty file.
    async fn reject_local_infile(&mut self, payload: &Bytes) -> Result<ResultSet> {
        let request = LocalInfileRequest::decode(&mut payload.clone())?;
        tracing::warn!(file = %request.file_name, "rejecting local infile request");
        self.send_reply(Bytes::new()).await?;
        match self.receive_reply().await {
            Ok(_) | Err(Error::Server(_)) => {}
            Err(err) => return Err(err),
        }
        Err(Error::NotSupported(format!(
            "LOAD DATA LOCAL INFILE is not supported (requested '{}')",
            request.file_name
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn ok_payload(status: ServerStatus, header: u8) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(header);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(status.bits());
        buf.put_u16_le(2);
        buf.freeze()
    }

    #[test]
    fn test_end_of_rows_detection() {
        let eof = [0xFE, 0, 0, 2, 0];
        assert!(is_end_of_rows(&eof, false));
        assert!(is_end_of_rows(&eof, true));

        // A row whose first value has an 8-byte length prefix.
        let mut row = vec![0xFE];
        row.extend_from_slice(&[9, 0, 0, 0, 0, 0, 0, 0]);
        row.extend_from_slice(&[b'x'; 9]);
        assert!(!is_end_of_rows(&row, false));

        // A long OK terminator is only recognised with deprecated EOF.
        let mut ok = vec![0xFE, 0, 0, 2, 0, 0, 0];
        ok.extend_from_slice(b"session state");
        assert!(is_end_of_rows(&ok, true));
        assert!(!is_end_of_rows(&ok, false));

        assert!(!is_end_of_rows(&[0x01, b'a'], true));
        assert!(!is_end_of_rows(&[], true));
    }

    #[test]
    fn test_end_status() {
        let status = ServerStatus::MORE_RESULTS_EXIST;
        let (warnings, parsed) = end_of_rows(&ok_payload(status, 0xFE), true).unwrap();
        assert_eq!(warnings, 2);
        assert!(parsed.contains(ServerStatus::MORE_RESULTS_EXIST));

        let eof = Bytes::from_static(&[0xFE, 1, 0, 0x08, 0]);
        let (warnings, parsed) = end_of_rows(&eof, false).unwrap();
        assert_eq!(warnings, 1);
        assert!(parsed.contains(ServerStatus::MORE_RESULTS_EXIST));
    }

    #[test]
    fn test_from_ok() {
        let ok = OkPacket::decode(&mut ok_payload(ServerStatus::empty(), 0x00)).unwrap();
        let result = ResultSet::from_ok(&ok);
        assert!(!result.has_rows());
        assert!(!result.has_more_results());
        assert_eq!(result.warnings, 2);
        assert_eq!(result.scalar_i64(), None);
    }
}
