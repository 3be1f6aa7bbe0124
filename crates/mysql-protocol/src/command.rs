//! Client command payloads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{write_lenenc_int, write_null_terminated};

/// Command byte that opens a client conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum CommandKind {
    /// `COM_QUIT`: close the connection.
    Quit = 0x01,
    /// `COM_INIT_DB`: change the default database.
    InitDatabase = 0x02,
    /// `COM_QUERY`: execute a text statement.
    Query = 0x03,
    /// `COM_PING`: check that the server is alive.
    Ping = 0x0E,
    /// `COM_CHANGE_USER`: re-authenticate on the same connection.
    ChangeUser = 0x11,
    /// `COM_STMT_PREPARE`: prepare a statement.
    StatementPrepare = 0x16,
    /// `COM_STMT_EXECUTE`: execute a prepared statement.
    StatementExecute = 0x17,
    /// `COM_STMT_CLOSE`: deallocate a prepared statement.
    StatementClose = 0x19,
    /// `COM_STMT_RESET`: reset a prepared statement.
    StatementReset = 0x1A,
    /// `COM_RESET_CONNECTION`: reset session state.
    ResetConnection = 0x1F,
}

impl CommandKind {
    /// The command byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

fn single_byte(kind: CommandKind) -> Bytes {
    Bytes::copy_from_slice(&[kind.as_u8()])
}

/// `COM_QUIT`.
#[must_use]
pub fn encode_quit() -> Bytes {
    single_byte(CommandKind::Quit)
}

/// `COM_PING`.
#[must_use]
pub fn encode_ping() -> Bytes {
    single_byte(CommandKind::Ping)
}

/// `COM_RESET_CONNECTION`.
#[must_use]
pub fn encode_reset_connection() -> Bytes {
    single_byte(CommandKind::ResetConnection)
}

/// `COM_INIT_DB`.
#[must_use]
pub fn encode_init_database(database: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + database.len());
    buf.put_u8(CommandKind::InitDatabase.as_u8());
    buf.put_slice(database.as_bytes());
    buf.freeze()
}

/// Write the `COM_QUERY` header.
///
/// When query attributes were negotiated the header carries an empty
/// attribute list: a zero count followed by a single parameter set.
pub fn write_query_header(dst: &mut impl BufMut, query_attributes: bool) {
    dst.put_u8(CommandKind::Query.as_u8());
    if query_attributes {
        write_lenenc_int(dst, 0);
        dst.put_u8(1);
    }
}

/// `COM_QUERY` for a single statement.
#[must_use]
pub fn encode_query(sql: &[u8], query_attributes: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + sql.len());
    write_query_header(&mut buf, query_attributes);
    buf.put_slice(sql);
    buf.freeze()
}

/// `COM_STMT_PREPARE`.
#[must_use]
pub fn encode_prepare(sql: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + sql.len());
    buf.put_u8(CommandKind::StatementPrepare.as_u8());
    buf.put_slice(sql);
    buf.freeze()
}

/// `COM_STMT_CLOSE`.
#[must_use]
pub fn encode_statement_close(statement_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(CommandKind::StatementClose.as_u8());
    buf.put_u32_le(statement_id);
    buf.freeze()
}

/// Fields of a `COM_CHANGE_USER` request.
#[derive(Debug, Clone)]
pub struct ChangeUser<'a> {
    /// User name.
    pub username: &'a str,
    /// Authentication response computed with the original handshake challenge.
    pub auth_response: &'a [u8],
    /// Database to select.
    pub database: &'a str,
    /// Character set / collation id.
    pub character_set: u8,
    /// Authentication plugin that produced `auth_response`.
    pub auth_plugin_name: &'a str,
    /// Pre-encoded connection attributes.
    pub connection_attributes: Option<&'a [u8]>,
}

impl ChangeUser<'_> {
    /// Encode the request.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.auth_response.len());
        buf.put_u8(CommandKind::ChangeUser.as_u8());
        write_null_terminated(&mut buf, self.username.as_bytes());
        buf.put_u8(self.auth_response.len() as u8);
        buf.put_slice(self.auth_response);
        write_null_terminated(&mut buf, self.database.as_bytes());
        buf.put_u16_le(u16::from(self.character_set));
        write_null_terminated(&mut buf, self.auth_plugin_name.as_bytes());
        if let Some(attrs) = self.connection_attributes {
            buf.put_slice(attrs);
        }
        buf.freeze()
    }
}
