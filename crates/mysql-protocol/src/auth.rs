//! Authentication exchange payloads.

use bytes::{Buf, Bytes};

use crate::codec::{expect_u8, read_null_terminated};
use crate::error::ProtocolError;
use crate::packet::sentinel;

/// Plugin name reported for a bare `0xFE` switch request.
pub const OLD_PASSWORD_PLUGIN: &str = "mysql_old_password";

/// `caching_sha2_password` fast-auth outcome bytes sent inside an [`AuthMoreData`].
pub mod caching_sha2_status {
    /// The scramble matched the server's cache; an OK payload follows.
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// The server needs the full password exchange.
    pub const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;
}

/// Client request bytes asking the server for its RSA public key.
pub mod public_key_request {
    /// Request byte used by `caching_sha2_password`.
    pub const CACHING_SHA2: u8 = 0x02;
    /// Request byte used by `sha256_password`.
    pub const SHA256: u8 = 0x01;
}

/// A request from the server to switch authentication plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    /// Name of the plugin to switch to.
    pub plugin_name: String,
    /// Plugin-specific data, usually a new challenge.
    pub data: Bytes,
}

impl AuthSwitchRequest {
    /// Parse an authentication switch request.
    ///
    /// A payload consisting of the header byte alone is the legacy switch to
    /// [`OLD_PASSWORD_PLUGIN`].
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        expect_u8(src, sentinel::EOF)?;
        if !src.has_remaining() {
            return Ok(Self {
                plugin_name: OLD_PASSWORD_PLUGIN.to_string(),
                data: Bytes::new(),
            });
        }
        let name = read_null_terminated(src)?;
        let data = src.copy_to_bytes(src.remaining());
        Ok(Self {
            plugin_name: String::from_utf8_lossy(&name).into_owned(),
            data,
        })
    }
}

/// Additional authentication data sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMoreData {
    /// The plugin-specific data.
    pub data: Bytes,
}

impl AuthMoreData {
    /// Parse an authentication "more data" payload.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        expect_u8(src, sentinel::AUTH_MORE_DATA)?;
        Ok(Self {
            data: src.copy_to_bytes(src.remaining()),
        })
    }
}
