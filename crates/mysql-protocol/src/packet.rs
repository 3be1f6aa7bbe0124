//! Wire packet and compressed frame headers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Packet header size in bytes (3-byte length + 1-byte sequence).
pub const PACKET_HEADER_SIZE: usize = 4;

/// Maximum payload bytes carried by a single wire packet.
pub const MAX_PACKET_SIZE: usize = 0x00FF_FFFF;

/// Compressed frame header size in bytes.
pub const COMPRESSED_HEADER_SIZE: usize = 7;

/// Payloads shorter than this are sent uncompressed inside a compressed frame.
pub const MIN_COMPRESS_LENGTH: usize = 50;

/// Header byte sentinels that identify the kind of a payload.
pub mod sentinel {
    /// OK payload.
    pub const OK: u8 = 0x00;
    /// Authentication "more data" payload (only inside the authentication exchange).
    pub const AUTH_MORE_DATA: u8 = 0x01;
    /// Local infile request.
    pub const LOCAL_INFILE: u8 = 0xFB;
    /// EOF payload, or authentication method switch request during authentication.
    pub const EOF: u8 = 0xFE;
    /// Error payload.
    pub const ERROR: u8 = 0xFF;
}

/// Classification of a payload by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// `0x00`: OK.
    Ok,
    /// `0xFF`: server error.
    Error,
    /// `0xFE`: EOF (or an OK carried in an EOF wrapper when `DEPRECATE_EOF` is set).
    Eof,
    /// `0xFB`: local infile request.
    LocalInfile,
    /// Any other first byte; the start of a result set or row.
    ResultSet,
}

impl PayloadKind {
    /// Classify a payload by its header byte.
    ///
    /// An empty payload is reported as [`PayloadKind::ResultSet`] so that the
    /// caller decides how to treat it.
    #[must_use]
    pub fn classify(payload: &[u8]) -> Self {
        match payload.first() {
            Some(&sentinel::OK) => Self::Ok,
            Some(&sentinel::ERROR) => Self::Error,
            Some(&sentinel::EOF) => Self::Eof,
            Some(&sentinel::LOCAL_INFILE) => Self::LocalInfile,
            _ => Self::ResultSet,
        }
    }
}

/// Header of a single wire packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length carried by this packet (at most [`MAX_PACKET_SIZE`]).
    pub length: u32,
    /// Sequence number within the current conversation.
    pub sequence: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(length: u32, sequence: u8) -> Self {
        Self { length, sequence }
    }

    /// Parse a packet header.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::UnexpectedEof {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }
        let length = src.get_uint_le(3) as u32;
        let sequence = src.get_u8();
        Ok(Self { length, sequence })
    }

    /// Encode the packet header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_uint_le(u64::from(self.length), 3);
        dst.put_u8(self.sequence);
    }

    /// Encode the packet header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Payload length as a `usize`.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length as usize
    }

    /// Whether another packet of the same payload follows this one.
    #[must_use]
    pub const fn has_continuation(&self) -> bool {
        self.length as usize == MAX_PACKET_SIZE
    }
}

/// Header of a compressed frame.
///
/// `uncompressed_length == 0` means the frame body is stored uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedHeader {
    /// Length of the frame body on the wire.
    pub compressed_length: u32,
    /// Compressed-frame sequence number (independent of packet sequence numbers).
    pub sequence: u8,
    /// Length of the body after decompression, or 0 if not compressed.
    pub uncompressed_length: u32,
}

impl CompressedHeader {
    /// Parse a compressed frame header.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < COMPRESSED_HEADER_SIZE {
            return Err(ProtocolError::UnexpectedEof {
                expected: COMPRESSED_HEADER_SIZE,
                actual: src.remaining(),
            });
        }
        let compressed_length = src.get_uint_le(3) as u32;
        let sequence = src.get_u8();
        let uncompressed_length = src.get_uint_le(3) as u32;
        Ok(Self {
            compressed_length,
            sequence,
            uncompressed_length,
        })
    }

    /// Encode a compressed frame header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_uint_le(u64::from(self.compressed_length), 3);
        dst.put_u8(self.sequence);
        dst.put_uint_le(u64::from(self.uncompressed_length), 3);
    }

    /// Whether the body is zlib-compressed.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.uncompressed_length != 0
    }
}

/// Number of wire packets needed to carry a payload of `len` bytes.
///
/// A payload whose length is an exact multiple of [`MAX_PACKET_SIZE`]
/// (including zero) is terminated by an extra empty packet.
#[must_use]
pub const fn packet_count(len: usize) -> usize {
    len / MAX_PACKET_SIZE + 1
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader::new(0x0012_3456, 7);
        let bytes = header.encode_to_bytes();
        assert_eq!(&bytes[..], &[0x56, 0x34, 0x12, 7]);

        let mut cursor = bytes.as_ref();
        assert_eq!(PacketHeader::decode(&mut cursor).unwrap(), header);
    }

    #[test]
    fn test_max_header() {
        let header = PacketHeader::new(MAX_PACKET_SIZE as u32, 255);
        assert_eq!(&header.encode_to_bytes()[..], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(header.has_continuation());
        assert!(!PacketHeader::new(10, 0).has_continuation());
    }

    #[test]
    fn test_short_header() {
        let mut cursor: &[u8] = &[1, 0];
        assert_eq!(
            PacketHeader::decode(&mut cursor),
            Err(ProtocolError::UnexpectedEof {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_compressed_header() {
        let header = CompressedHeader {
            compressed_length: 20,
            sequence: 3,
            uncompressed_length: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[..], &[20, 0, 0, 3, 0, 0, 0]);
        assert!(!header.is_compressed());

        let mut cursor = &buf[..];
        assert_eq!(CompressedHeader::decode(&mut cursor).unwrap(), header);
    }

    #[test]
    fn test_packet_count() {
        assert_eq!(packet_count(0), 1);
        assert_eq!(packet_count(10), 1);
        assert_eq!(packet_count(MAX_PACKET_SIZE - 1), 1);
        assert_eq!(packet_count(MAX_PACKET_SIZE), 2);
        assert_eq!(packet_count(2 * MAX_PACKET_SIZE), 3);
        assert_eq!(packet_count(2 * MAX_PACKET_SIZE + 1), 3);
    }

    #[test]
    fn test_classify() {
        assert_eq!(PayloadKind::classify(&[0x00, 1]), PayloadKind::Ok);
        assert_eq!(PayloadKind::classify(&[0xFF, 1]), PayloadKind::Error);
        assert_eq!(PayloadKind::classify(&[0xFE]), PayloadKind::Eof);
        assert_eq!(PayloadKind::classify(&[0xFB]), PayloadKind::LocalInfile);
        assert_eq!(PayloadKind::classify(&[0x03]), PayloadKind::ResultSet);
        assert_eq!(PayloadKind::classify(&[]), PayloadKind::ResultSet);
    }
}
