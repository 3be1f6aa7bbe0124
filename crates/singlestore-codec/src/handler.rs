//! Payload handler: conversations, splitting and reassembly.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use mysql_protocol::packet::MAX_PACKET_SIZE;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedParts};

use crate::compression::CompressedCodec;
use crate::error::CodecError;
use crate::frame::FrameCodec;
use crate::packet_codec::Packet;

/// Reads and writes logical payloads over a transport.
///
/// Every request/response exchange starts with
/// [`start_new_conversation`](Self::start_new_conversation), which resets the
/// packet sequence counter to zero. Within a conversation each packet written
/// or read must carry the next sequence number, modulo 256.
pub struct PayloadHandler<T> {
    framed: Framed<T, FrameCodec>,
    sequence: u8,
    timeout: Option<Duration>,
    read_cache: BytesMut,
}

impl<T> PayloadHandler<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a handler over a freshly opened transport.
    pub fn new(transport: T) -> Self {
        Self::resume(transport, 0)
    }

    /// Create a handler over `transport` continuing an open conversation at `sequence`.
    ///
    /// Used after the transport is replaced mid-handshake.
    pub fn resume(transport: T, sequence: u8) -> Self {
        Self {
            framed: Framed::new(transport, FrameCodec::default()),
            sequence,
            timeout: None,
            read_cache: BytesMut::new(),
        }
    }

    /// Reset the packet sequence counter for a new request/response exchange.
    pub fn start_new_conversation(&mut self) {
        self.sequence = 0;
        self.framed.codec_mut().start_new_conversation();
    }

    /// The next sequence number that will be written or expected.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Set the timeout applied to each read and write; `None` waits forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// The current per-operation timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Switch to compressed framing.
    pub fn enable_compression(&mut self) {
        tracing::debug!("enabling protocol compression");
        *self.framed.codec_mut() = FrameCodec::Compressed(CompressedCodec::new());
    }

    /// Whether compressed framing is active.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.framed.codec().is_compressed()
    }

    /// Reference to the transport.
    pub fn get_ref(&self) -> &T {
        self.framed.get_ref()
    }

    /// Mutable reference to the transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.framed.get_mut()
    }

    /// Release the transport and the current sequence number so the transport
    /// can be wrapped (plaintext to TLS).
    ///
    /// Fails if any received bytes have not been consumed, since they would be
    /// lost across the swap.
    pub fn into_transport(self) -> Result<(T, u8), CodecError> {
        let FramedParts {
            io, read_buf, codec, ..
        } = self.framed.into_parts();
        let buffered = read_buf.len();
        if buffered > 0 || codec.has_buffered() {
            return Err(CodecError::BufferedDataAtSwap(buffered));
        }
        Ok((io, self.sequence))
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    async fn with_timeout<F, R>(timeout: Option<Duration>, fut: F) -> Result<R, CodecError>
    where
        F: std::future::Future<Output = Result<R, CodecError>>,
    {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| CodecError::Timeout)?,
            None => fut.await,
        }
    }

    /// Write one payload, splitting it into as many packets as needed.
    ///
    /// A payload whose length is a multiple of the maximum packet size
    /// (including an empty payload) ends with an empty packet.
    pub async fn write_payload(&mut self, payload: Bytes) -> Result<(), CodecError> {
        let timeout = self.timeout;
        let mut packets = Vec::with_capacity(payload.len() / MAX_PACKET_SIZE + 1);
        let mut offset = 0;
        loop {
            let len = (payload.len() - offset).min(MAX_PACKET_SIZE);
            let seq = self.next_sequence();
            packets.push(Packet::new(seq, payload.slice(offset..offset + len)));
            offset += len;
            if len < MAX_PACKET_SIZE {
                break;
            }
        }
        tracing::trace!(
            len = payload.len(),
            packets = packets.len(),
            "writing payload"
        );

        let framed = &mut self.framed;
        Self::with_timeout(timeout, async move {
            for packet in packets {
                framed.feed(packet).await?;
            }
            framed.flush().await
        })
        .await
    }

    /// Read one payload, reassembling continuation packets.
    pub async fn read_payload(&mut self) -> Result<Bytes, CodecError> {
        let timeout = self.timeout;
        let mut expected = self.sequence;
        let framed = &mut self.framed;
        let cache = &mut self.read_cache;

        let result = Self::with_timeout(timeout, async {
            loop {
                let packet = match framed.next().await {
                    Some(packet) => packet?,
                    None if !cache.is_empty() => {
                        return Err(CodecError::EndOfStream {
                            expected: cache.len() + 1,
                            read: cache.len(),
                        });
                    }
                    None => return Err(CodecError::ConnectionClosed),
                };

                if packet.sequence != expected {
                    return Err(CodecError::PacketOutOfOrder {
                        expected,
                        actual: packet.sequence,
                    });
                }
                expected = expected.wrapping_add(1);

                let last = !packet.has_continuation();
                if last && cache.is_empty() {
                    return Ok(packet.payload);
                }
                cache.extend_from_slice(&packet.payload);
                if last {
                    return Ok(cache.split().freeze());
                }
            }
        })
        .await;

        self.sequence = expected;
        if result.is_err() {
            self.read_cache.clear();
        }
        result
    }

    /// Flush and shut down the transport.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        use tokio::io::AsyncWriteExt;
        self.framed.flush().await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for PayloadHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadHandler")
            .field("sequence", &self.sequence)
            .field("timeout", &self.timeout)
            .field("compressed", &self.framed.codec().is_compressed())
            .finish_non_exhaustive()
    }
}
