//! Codec selection: plain packets or compressed frames.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::compression::CompressedCodec;
use crate::error::CodecError;
use crate::packet_codec::{Packet, PacketCodec};

/// The codec currently framing a connection.
///
/// A connection starts with [`FrameCodec::Standard`] and switches to
/// [`FrameCodec::Compressed`] after authentication when compression was
/// negotiated.
#[derive(Debug)]
pub enum FrameCodec {
    /// Uncompressed packets.
    Standard(PacketCodec),
    /// Packets inside compressed frames.
    Compressed(CompressedCodec),
}

impl FrameCodec {
    /// Reset any frame-level sequence state at the start of a conversation.
    pub fn start_new_conversation(&mut self) {
        if let Self::Compressed(codec) = self {
            codec.start_new_conversation();
        }
    }

    /// Whether compression is active.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// Whether the codec holds decoded-but-unconsumed bytes.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        match self {
            Self::Standard(_) => false,
            Self::Compressed(codec) => codec.has_buffered(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::Standard(PacketCodec::new())
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Standard(codec) => codec.decode(src),
            Self::Compressed(codec) => codec.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Standard(codec) => codec.decode_eof(src),
            Self::Compressed(codec) => codec.decode_eof(src),
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Self::Standard(codec) => codec.encode(item, dst),
            Self::Compressed(codec) => codec.encode(item, dst),
        }
    }
}
