//! Capability and server status flags.

use bitflags::bitflags;

bitflags! {
    /// Protocol capability flags exchanged during the handshake.
    ///
    /// Bits 0..32 come from the standard capability words; bits 32 and up are
    /// the extended capabilities some servers advertise in the handshake
    /// filler area.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u64 {
        /// Use the improved version of old password authentication.
        const LONG_PASSWORD = 0x0000_0001;
        /// Send found rows instead of affected rows.
        const FOUND_ROWS = 0x0000_0002;
        /// Longer flags in column definitions.
        const LONG_FLAG = 0x0000_0004;
        /// A database name may be supplied in the handshake response.
        const CONNECT_WITH_DB = 0x0000_0008;
        /// Disallow `database.table.column`.
        const NO_SCHEMA = 0x0000_0010;
        /// Compressed protocol.
        const COMPRESS = 0x0000_0020;
        /// Legacy ODBC behavior.
        const ODBC = 0x0000_0040;
        /// `LOAD DATA LOCAL INFILE` is allowed.
        const LOCAL_FILES = 0x0000_0080;
        /// Parser may ignore spaces before `(`.
        const IGNORE_SPACE = 0x0000_0100;
        /// 4.1 protocol.
        const PROTOCOL_41 = 0x0000_0200;
        /// Interactive client.
        const INTERACTIVE = 0x0000_0400;
        /// Switch to TLS after the handshake.
        const SSL = 0x0000_0800;
        /// Ignore SIGPIPE.
        const IGNORE_SIGPIPE = 0x0000_1000;
        /// Status flags in EOF payloads.
        const TRANSACTIONS = 0x0000_2000;
        /// Reserved.
        const RESERVED = 0x0000_4000;
        /// 4.1 authentication.
        const SECURE_CONNECTION = 0x0000_8000;
        /// Multiple statements per query.
        const MULTI_STATEMENTS = 0x0001_0000;
        /// Multiple result sets per query.
        const MULTI_RESULTS = 0x0002_0000;
        /// Multiple result sets from prepared statements.
        const PS_MULTI_RESULTS = 0x0004_0000;
        /// Pluggable authentication.
        const PLUGIN_AUTH = 0x0008_0000;
        /// Connection attributes in the handshake response.
        const CONNECTION_ATTRIBUTES = 0x0010_0000;
        /// Length-encoded authentication data in the handshake response.
        const PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x0020_0000;
        /// Client can handle expired passwords.
        const CAN_HANDLE_EXPIRED_PASSWORDS = 0x0040_0000;
        /// Session state change information in OK payloads.
        const SESSION_TRACK = 0x0080_0000;
        /// OK payloads replace EOF payloads.
        const DEPRECATE_EOF = 0x0100_0000;
        /// Optional result set metadata.
        const OPTIONAL_RESULTSET_METADATA = 0x0200_0000;
        /// Compression with zstd.
        const ZSTD_COMPRESSION = 0x0400_0000;
        /// Query attributes in `COM_QUERY`.
        const QUERY_ATTRIBUTES = 0x0800_0000;
        /// Multi-factor authentication.
        const MULTI_FACTOR_AUTHENTICATION = 0x1000_0000;
        /// Extended capability: bulk operations.
        const MARIADB_STMT_BULK_OPERATIONS = 1 << 34;
        /// Extended capability: extended type information.
        const MARIADB_EXTENDED_TYPE_INFO = 1 << 35;
        /// Extended capability: result set metadata caching.
        const MARIADB_CACHE_METADATA = 1 << 36;
    }
}

impl Capabilities {
    /// Capabilities the client never negotiates even when the server offers them.
    pub const UNSUPPORTED: Self = Self::MARIADB_CACHE_METADATA.union(Self::QUERY_ATTRIBUTES);

    /// Capabilities requested by the client in every handshake response.
    pub const CLIENT_DEFAULT: Self = Self::PROTOCOL_41
        .union(Self::LONG_PASSWORD)
        .union(Self::SECURE_CONNECTION)
        .union(Self::PLUGIN_AUTH)
        .union(Self::PLUGIN_AUTH_LENENC_CLIENT_DATA)
        .union(Self::MULTI_STATEMENTS)
        .union(Self::MULTI_RESULTS)
        .union(Self::LOCAL_FILES)
        .union(Self::TRANSACTIONS)
        .union(Self::INTERACTIVE)
        .union(Self::FOUND_ROWS);

    /// Mask out capabilities the client does not use.
    #[must_use]
    pub const fn negotiable(self) -> Self {
        self.difference(Self::UNSUPPORTED)
    }
}

bitflags! {
    /// Server status flags carried in OK and EOF payloads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServerStatus: u16 {
        /// A transaction is active.
        const IN_TRANSACTION = 0x0001;
        /// Autocommit is enabled.
        const AUTOCOMMIT = 0x0002;
        /// More result sets follow.
        const MORE_RESULTS_EXIST = 0x0008;
        /// No good index was used.
        const NO_GOOD_INDEX_USED = 0x0010;
        /// No index was used.
        const NO_INDEX_USED = 0x0020;
        /// A read-only cursor exists.
        const CURSOR_EXISTS = 0x0040;
        /// The last row of a cursor was sent.
        const LAST_ROW_SENT = 0x0080;
        /// A database was dropped.
        const DB_DROPPED = 0x0100;
        /// Backslash escapes are disabled.
        const NO_BACKSLASH_ESCAPES = 0x0200;
        /// Metadata changed.
        const METADATA_CHANGED = 0x0400;
        /// The query was slow.
        const QUERY_WAS_SLOW = 0x0800;
        /// Output parameters follow.
        const PS_OUT_PARAMS = 0x1000;
        /// A read-only transaction is active.
        const IN_TRANSACTION_READONLY = 0x2000;
        /// Session state changed.
        const SESSION_STATE_CHANGED = 0x4000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiable_masks_unsupported() {
        let server = Capabilities::PLUGIN_AUTH
            | Capabilities::QUERY_ATTRIBUTES
            | Capabilities::MARIADB_CACHE_METADATA
            | Capabilities::SSL;
        assert_eq!(
            server.negotiable(),
            Capabilities::PLUGIN_AUTH | Capabilities::SSL
        );
    }

    #[test]
    fn test_extended_bits_are_high() {
        assert_eq!(Capabilities::MARIADB_CACHE_METADATA.bits(), 0x10_0000_0000);
        assert!(!Capabilities::CLIENT_DEFAULT.contains(Capabilities::SSL));
        assert!(!Capabilities::CLIENT_DEFAULT.contains(Capabilities::COMPRESS));
    }
}
