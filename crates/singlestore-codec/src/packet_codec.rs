//! Wire packet codec implementation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mysql_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// One wire packet: a sequence number and up to [`MAX_PACKET_SIZE`] payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number within the conversation.
    pub sequence: u8,
    /// Packet payload (excluding header).
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet.
    #[must_use]
    pub fn new(sequence: u8, payload: Bytes) -> Self {
        Self { sequence, payload }
    }

    /// Get the total packet size including header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether a continuation packet follows this one.
    #[must_use]
    pub fn has_continuation(&self) -> bool {
        self.payload.len() == MAX_PACKET_SIZE
    }

    /// Append the encoded packet (header and payload) to `dst`.
    pub(crate) fn write_to(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        if self.payload.len() > MAX_PACKET_SIZE {
            return Err(mysql_protocol::ProtocolError::LengthOverflow {
                length: self.payload.len(),
                max: MAX_PACKET_SIZE,
            }
            .into());
        }
        dst.reserve(self.total_size());
        PacketHeader::new(self.payload.len() as u32, self.sequence).encode(dst);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// Try to split one complete packet off the front of `src`.
pub(crate) fn split_packet(src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
    if src.len() < PACKET_HEADER_SIZE {
        return Ok(None);
    }
    let header = PacketHeader::decode(&mut &src[..PACKET_HEADER_SIZE])?;
    let total = PACKET_HEADER_SIZE + header.payload_length();
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    src.advance(PACKET_HEADER_SIZE);
    let payload = src.split_to(header.payload_length()).freeze();
    Ok(Some(Packet::new(header.sequence, payload)))
}

/// Uncompressed packet codec for tokio-util framing.
///
/// Sequence numbers are carried on each [`Packet`]; the payload handler owns
/// the conversation counter and validates ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl PacketCodec {
    /// Create a new packet codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let packet = split_packet(src)?;
        if let Some(packet) = &packet {
            tracing::trace!(
                sequence = packet.sequence,
                len = packet.payload.len(),
                "decoded packet"
            );
        }
        Ok(packet)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(end_of_stream(src)),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst)?;
        tracing::trace!(
            sequence = item.sequence,
            len = item.payload.len(),
            "encoded packet"
        );
        Ok(())
    }
}

/// Describe a partially received packet left in `src` at end of stream.
pub(crate) fn end_of_stream(src: &BytesMut) -> CodecError {
    let expected = if src.len() >= 3 {
        PACKET_HEADER_SIZE + u32::from_le_bytes([src[0], src[1], src[2], 0]) as usize
    } else {
        PACKET_HEADER_SIZE
    };
    CodecError::EndOfStream {
        expected,
        read: src.len(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_packet() {
        let mut codec = PacketCodec::new();
        let mut data = BytesMut::new();
        data.put_slice(&[4, 0, 0, 3]);
        data.put_slice(b"test");
        data.put_slice(&[1, 0]);

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.sequence, 3);
        assert_eq!(&packet.payload[..], b"test");
        assert_eq!(data.len(), 2);
        assert!(codec.decode(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete() {
        let mut codec = PacketCodec::new();
        let mut data = BytesMut::from(&[10u8, 0, 0, 0, b'a'][..]);
        assert!(codec.decode(&mut data).unwrap().is_none());
        assert!(matches!(
            codec.decode_eof(&mut data),
            Err(CodecError::EndOfStream {
                expected: 14,
                read: 5
            })
        ));
    }

    #[test]
    fn test_decode_eof_clean() {
        let mut codec = PacketCodec::new();
        let mut data = BytesMut::new();
        assert!(codec.decode_eof(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_encode_packet() {
        let mut codec = PacketCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Packet::new(0, Bytes::from_static(b"\x0e")), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[1, 0, 0, 0, 0x0e]);
    }

    #[test]
    fn test_empty_packet() {
        let mut codec = PacketCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(Packet::new(9, Bytes::new()), &mut dst).unwrap();
        assert_eq!(&dst[..], &[0, 0, 0, 9]);
        let packet = codec.decode(&mut dst).unwrap().unwrap();
        assert!(packet.payload.is_empty());
        assert!(!packet.has_continuation());
    }
}
