//! Compressed protocol framing.
//!
//! With compression enabled the packet byte stream is carried inside
//! compressed frames. Each frame has a 7-byte header (compressed length,
//! frame sequence, uncompressed length) and a zlib body, or a stored body
//! when the uncompressed length is zero. Frame boundaries are independent of
//! packet boundaries: a frame may bundle several packets and a packet may span
//! several frames.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use mysql_protocol::packet::{
    COMPRESSED_HEADER_SIZE, CompressedHeader, MAX_PACKET_SIZE, MIN_COMPRESS_LENGTH,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::packet_codec::{Packet, end_of_stream, split_packet};

/// Codec that wraps wire packets in compressed frames.
///
/// The frame sequence counter is separate from the packet sequence counter
/// and is reset by [`CompressedCodec::start_new_conversation`].
#[derive(Debug, Default)]
pub struct CompressedCodec {
    sequence: u8,
    inflated: BytesMut,
}

impl CompressedCodec {
    /// Create a new compressed codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the frame sequence counter.
    pub fn start_new_conversation(&mut self) {
        self.sequence = 0;
    }

    /// Current frame sequence counter.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Whether inflated packet bytes are waiting to be decoded.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.inflated.is_empty()
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    /// Try to consume one complete frame from `src`, inflating it into the
    /// internal packet buffer. Returns `false` when more bytes are needed.
    fn read_frame(&mut self, src: &mut BytesMut) -> Result<bool, CodecError> {
        if src.len() < COMPRESSED_HEADER_SIZE {
            return Ok(false);
        }
        let header = CompressedHeader::decode(&mut &src[..COMPRESSED_HEADER_SIZE])?;
        let total = COMPRESSED_HEADER_SIZE + header.compressed_length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(false);
        }

        if header.sequence != self.sequence {
            return Err(CodecError::PacketOutOfOrder {
                expected: self.sequence,
                actual: header.sequence,
            });
        }
        self.sequence = self.sequence.wrapping_add(1);

        src.advance(COMPRESSED_HEADER_SIZE);
        let body = src.split_to(header.compressed_length as usize);
        if header.is_compressed() {
            let expected = header.uncompressed_length as usize;
            let mut inflated = Vec::with_capacity(expected);
            ZlibDecoder::new(&body[..])
                .read_to_end(&mut inflated)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            if inflated.len() != expected {
                return Err(CodecError::Compression(format!(
                    "expected {expected} uncompressed bytes but got {}",
                    inflated.len()
                )));
            }
            self.inflated.extend_from_slice(&inflated);
        } else {
            self.inflated.extend_from_slice(&body);
        }

        tracing::trace!(
            sequence = header.sequence,
            len = header.compressed_length,
            uncompressed_len = header.uncompressed_length,
            "decoded compressed frame"
        );
        Ok(true)
    }

    /// Write `data` as one frame, compressing it when that saves space.
    fn write_frame(&mut self, data: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
        let compressed = if data.len() >= MIN_COMPRESS_LENGTH {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            let out = encoder
                .finish()
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            (out.len() < data.len()).then_some(out)
        } else {
            None
        };

        let sequence = self.next_sequence();
        let (body, uncompressed_length) = match &compressed {
            Some(out) => (&out[..], data.len() as u32),
            None => (data, 0),
        };
        dst.reserve(COMPRESSED_HEADER_SIZE + body.len());
        CompressedHeader {
            compressed_length: body.len() as u32,
            sequence,
            uncompressed_length,
        }
        .encode(dst);
        dst.put_slice(body);
        Ok(())
    }
}

impl Decoder for CompressedCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(packet) = split_packet(&mut self.inflated)? {
                return Ok(Some(packet));
            }
            if !self.read_frame(src)? {
                return Ok(None);
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() && self.inflated.is_empty() => Ok(None),
            None if !self.inflated.is_empty() => Err(end_of_stream(&self.inflated)),
            None => Err(CodecError::EndOfStream {
                expected: COMPRESSED_HEADER_SIZE.max(src.len() + 1),
                read: src.len(),
            }),
        }
    }
}

impl Encoder<Packet> for CompressedCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut raw = BytesMut::with_capacity(item.total_size());
        item.write_to(&mut raw)?;
        // A full-size packet plus its header exceeds the 3-byte frame length.
        for chunk in raw.chunks(MAX_PACKET_SIZE) {
            self.write_frame(chunk, dst)?;
        }
        Ok(())
    }
}
