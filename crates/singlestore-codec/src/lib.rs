//! # singlestore-codec
//!
//! Async framing layer for MySQL wire packets.
//!
//! This crate turns a raw byte stream into logical payloads. It handles the
//! 4-byte packet header, per-conversation sequence numbers, splitting of
//! payloads larger than one packet, and the optional zlib-compressed frame
//! layer negotiated after authentication.
//!
//! ## Architecture
//!
//! ```text
//! Transport → FrameCodec (packets or compressed frames) → PayloadHandler → session
//! ```
//!
//! [`PayloadHandler`] owns the sequence counter. Callers start every
//! request/response exchange with
//! [`PayloadHandler::start_new_conversation`] and then read or write whole
//! payloads:
//!
//! ```rust,ignore
//! use singlestore_codec::PayloadHandler;
//!
//! let mut handler = PayloadHandler::new(transport);
//! handler.start_new_conversation();
//! handler.write_payload(mysql_protocol::command::encode_ping()).await?;
//! let reply = handler.read_payload().await?;
//! ```
//!
//! ### Transport swap
//!
//! TLS is negotiated in the middle of the handshake conversation.
//! [`PayloadHandler::into_transport`] releases the stream together with the
//! current sequence number, and [`PayloadHandler::resume`] continues the same
//! conversation over the wrapped stream.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod compression;
pub mod error;
pub mod frame;
pub mod handler;
pub mod packet_codec;
pub mod transport;

pub use compression::CompressedCodec;
pub use error::CodecError;
pub use frame::FrameCodec;
pub use handler::PayloadHandler;
pub use packet_codec::{Packet, PacketCodec};
pub use transport::Transport;
