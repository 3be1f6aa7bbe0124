//! # mysql-protocol
//!
//! Pure implementation of the MySQL client/server wire protocol as spoken by
//! SingleStore.
//!
//! This crate provides packet headers, handshake and authentication payloads,
//! command encoders, and result metadata parsing.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Higher-level crates build upon
//! this foundation to provide async I/O capabilities.
//!
//! ## Example
//!
//! ```rust
//! use mysql_protocol::{PacketHeader, PACKET_HEADER_SIZE};
//!
//! let header = PacketHeader::new(100, 0);
//! assert_eq!(header.encode_to_bytes().len(), PACKET_HEADER_SIZE);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod auth;
pub mod capabilities;
pub mod codec;
pub mod column;
pub mod command;
pub mod error;
pub mod error_code;
pub mod handshake;
pub mod packet;
pub mod prepare;
pub mod response;
pub mod row;
pub mod version;

pub use auth::{AuthMoreData, AuthSwitchRequest, OLD_PASSWORD_PLUGIN};
pub use capabilities::{Capabilities, ServerStatus};
pub use column::{charset, ColumnDefinition, ColumnFlags, ColumnNames, ColumnType};
pub use command::{ChangeUser, CommandKind};
pub use error::ProtocolError;
pub use handshake::{HandshakeResponse, InitialHandshake};
pub use packet::{
    sentinel, CompressedHeader, PacketHeader, PayloadKind, COMPRESSED_HEADER_SIZE,
    MAX_PACKET_SIZE, MIN_COMPRESS_LENGTH, PACKET_HEADER_SIZE,
};
pub use prepare::StmtPrepareOk;
pub use response::{EofPacket, ErrPacket, LocalInfileRequest, OkPacket};
pub use row::TextRow;
pub use version::{ServerVersion, Version};
