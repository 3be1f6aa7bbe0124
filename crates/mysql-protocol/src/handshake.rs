//! Initial handshake and handshake response payloads.
//!
//! The server opens every connection with an [`InitialHandshake`]. The client
//! answers with either an SSL request (the first 32 bytes of a
//! [`HandshakeResponse`], after which TLS is negotiated) or a full
//! [`HandshakeResponse`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::capabilities::{Capabilities, ServerStatus};
use crate::codec::{
    expect_u8, read_bytes, read_null_or_eof_terminated, read_null_terminated, read_u16, read_u32,
    read_u8, skip, write_lenenc_bytes, write_null_terminated,
};
use crate::error::ProtocolError;

/// Handshake protocol version implemented by this crate.
pub const PROTOCOL_VERSION: u8 = 0x0A;

/// Maximum packet size announced by the client.
pub const CLIENT_MAX_PACKET_SIZE: u32 = 0x4000_0000;

/// Size of the fixed part of a handshake response (and of an SSL request).
pub const SSL_REQUEST_SIZE: usize = 32;

/// The first payload sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    /// Capabilities advertised by the server, including extended bits.
    pub capabilities: Capabilities,
    /// Raw server version string.
    pub server_version: Bytes,
    /// Server-assigned connection id.
    pub connection_id: u32,
    /// Authentication challenge (both parts concatenated).
    pub auth_plugin_data: Bytes,
    /// Name of the server's default authentication plugin.
    pub auth_plugin_name: Option<String>,
    /// Server default character set, when sent.
    pub character_set: Option<u8>,
    /// Server status, when sent.
    pub status: ServerStatus,
}

impl InitialHandshake {
    /// Parse an initial handshake payload.
    ///
    /// Fails on a protocol version other than 10 or on trailing bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let version = read_u8(src)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedProtocolVersion(version));
        }
        let server_version = Bytes::from(read_null_terminated(src)?);
        let connection_id = read_u32(src)?;
        let auth_data_1 = read_bytes(src, 8)?;
        expect_u8(src, 0)?;
        let mut capabilities = Capabilities::from_bits_retain(u64::from(read_u16(src)?));

        let mut character_set = None;
        let mut status = ServerStatus::empty();
        let mut auth_plugin_data = auth_data_1.clone();
        let mut auth_plugin_name = None;

        if src.has_remaining() {
            character_set = Some(read_u8(src)?);
            status = ServerStatus::from_bits_retain(read_u16(src)?);
            let high = u64::from(read_u16(src)?);
            capabilities |= Capabilities::from_bits_retain(high << 16);
            let auth_data_length = read_u8(src)?;
            skip(src, 6)?;
            let extended = u64::from(read_u32(src)?);
            // Servers that clear LONG_PASSWORD use the filler for extended capabilities.
            if !capabilities.contains(Capabilities::LONG_PASSWORD) {
                capabilities |= Capabilities::from_bits_retain(extended << 32);
            }

            if capabilities.contains(Capabilities::SECURE_CONNECTION) {
                let len = usize::from(auth_data_length).saturating_sub(8).max(13);
                let auth_data_2 = read_bytes(src, len)?;
                let mut data = BytesMut::with_capacity(8 + len);
                data.extend_from_slice(&auth_data_1);
                data.extend_from_slice(&auth_data_2);
                auth_plugin_data = data.freeze();
            }
            if capabilities.contains(Capabilities::PLUGIN_AUTH) {
                let name = read_null_or_eof_terminated(src);
                auth_plugin_name = Some(String::from_utf8_lossy(&name).into_owned());
            }
        }

        if src.has_remaining() {
            return Err(ProtocolError::ExtraBytes(src.remaining()));
        }

        Ok(Self {
            capabilities,
            server_version,
            connection_id,
            auth_plugin_data,
            auth_plugin_name,
            character_set,
            status,
        })
    }

    /// The server version as a lossy UTF-8 string.
    #[must_use]
    pub fn server_version_str(&self) -> String {
        String::from_utf8_lossy(&self.server_version).into_owned()
    }
}

/// The client's answer to the initial handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// Capabilities the client requests.
    pub capabilities: Capabilities,
    /// Character set / collation id for the session.
    pub character_set: u8,
    /// User name.
    pub username: String,
    /// Authentication plugin response.
    pub auth_response: Bytes,
    /// Initial database, sent when `CONNECT_WITH_DB` is requested.
    pub database: Option<String>,
    /// Name of the authentication plugin that produced `auth_response`.
    pub auth_plugin_name: String,
    /// Pre-encoded connection attributes, sent when `CONNECTION_ATTRIBUTES` is requested.
    pub connection_attributes: Option<Bytes>,
}

impl HandshakeResponse {
    /// Encode the fixed header shared by the SSL request and the full response.
    fn encode_header(capabilities: Capabilities, character_set: u8, dst: &mut impl BufMut) {
        dst.put_u32_le(capabilities.bits() as u32);
        dst.put_u32_le(CLIENT_MAX_PACKET_SIZE);
        dst.put_u8(character_set);
        dst.put_bytes(0, 23);
    }

    /// Encode an SSL request: the fixed header only, with `SSL` set.
    #[must_use]
    pub fn encode_ssl_request(capabilities: Capabilities, character_set: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(SSL_REQUEST_SIZE);
        Self::encode_header(capabilities | Capabilities::SSL, character_set, &mut buf);
        buf.freeze()
    }

    /// Encode the full handshake response.
    pub fn encode(&self, dst: &mut impl BufMut) {
        Self::encode_header(self.capabilities, self.character_set, dst);
        write_null_terminated(dst, self.username.as_bytes());

        if self
            .capabilities
            .contains(Capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA)
        {
            write_lenenc_bytes(dst, &self.auth_response);
        } else {
            dst.put_u8(self.auth_response.len() as u8);
            dst.put_slice(&self.auth_response);
        }

        if self.capabilities.contains(Capabilities::CONNECT_WITH_DB) {
            write_null_terminated(dst, self.database.as_deref().unwrap_or("").as_bytes());
        }
        if self.capabilities.contains(Capabilities::PLUGIN_AUTH) {
            write_null_terminated(dst, self.auth_plugin_name.as_bytes());
        }
        if self.capabilities.contains(Capabilities::CONNECTION_ATTRIBUTES) {
            if let Some(attrs) = &self.connection_attributes {
                dst.put_slice(attrs);
            }
        }
    }

    /// Encode the full handshake response to a new buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128 + self.auth_response.len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_handshake(plugin: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(0x0A);
        buf.put_slice(b"5.7.32-SingleStore\0");
        buf.put_u32_le(42);
        buf.put_slice(b"abcdefgh");
        buf.put_u8(0);
        let caps = Capabilities::CLIENT_DEFAULT
            | Capabilities::SSL
            | Capabilities::CONNECTION_ATTRIBUTES
            | Capabilities::DEPRECATE_EOF;
        buf.put_u16_le(caps.bits() as u16);
        buf.put_u8(33);
        buf.put_u16_le(ServerStatus::AUTOCOMMIT.bits());
        buf.put_u16_le((caps.bits() >> 16) as u16);
        buf.put_u8(21);
        buf.put_bytes(0, 6);
        buf.put_u32_le(0);
        buf.put_slice(b"ijklmnopqrst\0");
        buf.put_slice(plugin);
        buf
    }

    #[test]
    fn test_decode_initial_handshake() {
        let buf = sample_handshake(b"mysql_native_password\0");
        let hs = InitialHandshake::decode(&mut buf.freeze()).unwrap();
        assert_eq!(hs.server_version_str(), "5.7.32-SingleStore");
        assert_eq!(hs.connection_id, 42);
        assert_eq!(&hs.auth_plugin_data[..], b"abcdefghijklmnopqrst\0");
        assert_eq!(hs.auth_plugin_name.as_deref(), Some("mysql_native_password"));
        assert_eq!(hs.character_set, Some(33));
        assert!(hs.capabilities.contains(Capabilities::SSL));
        assert!(hs.capabilities.contains(Capabilities::DEPRECATE_EOF));
        assert!(hs.status.contains(ServerStatus::AUTOCOMMIT));
    }

    #[test]
    fn test_plugin_name_terminated_by_eof() {
        let buf = sample_handshake(b"caching_sha2_password");
        let hs = InitialHandshake::decode(&mut buf.freeze()).unwrap();
        assert_eq!(hs.auth_plugin_name.as_deref(), Some("caching_sha2_password"));
    }

    #[test]
    fn test_extra_bytes_rejected() {
        let mut buf = sample_handshake(b"mysql_native_password\0");
        buf.put_u8(1);
        assert_eq!(
            InitialHandshake::decode(&mut buf.freeze()),
            Err(ProtocolError::ExtraBytes(1))
        );
    }

    #[test]
    fn test_wrong_protocol_version() {
        let mut cursor: &[u8] = &[9, 0];
        assert_eq!(
            InitialHandshake::decode(&mut cursor),
            Err(ProtocolError::UnsupportedProtocolVersion(9))
        );
    }

    #[test]
    fn test_extended_capabilities_when_long_password_clear() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x0A);
        buf.put_slice(b"5.5.5-10.6.0-MariaDB\0");
        buf.put_u32_le(1);
        buf.put_slice(b"abcdefgh");
        buf.put_u8(0);
        buf.put_u16_le(Capabilities::PROTOCOL_41.bits() as u16);
        buf.put_u8(45);
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_u8(0);
        buf.put_bytes(0, 6);
        buf.put_u32_le((Capabilities::MARIADB_CACHE_METADATA.bits() >> 32) as u32);
        let hs = InitialHandshake::decode(&mut buf.freeze()).unwrap();
        assert!(hs.capabilities.contains(Capabilities::MARIADB_CACHE_METADATA));
        assert_eq!(&hs.auth_plugin_data[..], b"abcdefgh");
        assert!(hs.auth_plugin_name.is_none());
    }

    #[test]
    fn test_minimal_handshake() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x0A);
        buf.put_slice(b"4.0\0");
        buf.put_u32_le(7);
        buf.put_slice(b"12345678");
        buf.put_u8(0);
        buf.put_u16_le(0);
        let hs = InitialHandshake::decode(&mut buf.freeze()).unwrap();
        assert_eq!(hs.character_set, None);
        assert_eq!(&hs.auth_plugin_data[..], b"12345678");
    }

    #[test]
    fn test_ssl_request_layout() {
        let bytes = HandshakeResponse::encode_ssl_request(Capabilities::CLIENT_DEFAULT, 45);
        assert_eq!(bytes.len(), SSL_REQUEST_SIZE);
        let caps = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_ne!(caps & Capabilities::SSL.bits() as u32, 0);
        assert_eq!(bytes[8], 45);
        assert!(bytes[9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_response() {
        let response = HandshakeResponse {
            capabilities: Capabilities::CLIENT_DEFAULT | Capabilities::CONNECT_WITH_DB,
            character_set: 45,
            username: "root".into(),
            auth_response: Bytes::from_static(&[1, 2, 3]),
            database: Some("db".into()),
            auth_plugin_name: "mysql_native_password".into(),
            connection_attributes: None,
        };
        let bytes = response.encode_to_bytes();
        let mut rest = &bytes[SSL_REQUEST_SIZE..];
        assert_eq!(read_null_terminated(&mut rest).unwrap(), b"root");
        assert_eq!(&rest[..4], &[3, 1, 2, 3]);
        rest.advance(4);
        assert_eq!(read_null_terminated(&mut rest).unwrap(), b"db");
        assert_eq!(
            read_null_terminated(&mut rest).unwrap(),
            b"mysql_native_password"
        );
        assert!(rest.is_empty());
    }
}
