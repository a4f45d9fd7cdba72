//! Length-prefixed framing for bridge envelopes.
//!
//! # Frame Format
//!
//! - 4 bytes: magic bytes "VSSL"
//! - 4 bytes: content length (big-endian, includes the flags byte)
//! - 1 byte: flags (bit 0 = compressed)
//! - N bytes: payload, a MessagePack-encoded [`Envelope`]
//!
//! Payloads larger than [`COMPRESSION_THRESHOLD`] are LZ4-compressed when
//! that makes them smaller. Bursts of terminal output compress well;
//! keystrokes never reach the threshold.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::messages::Envelope;

/// Magic bytes identifying a Vessel frame.
pub const FRAME_MAGIC: [u8; 4] = *b"VSSL";

/// Payloads larger than this are considered for compression.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size: 4 (magic) + 4 (length) + 1 (flags) = 9 bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Magic + length, the part of the header that precedes the content.
const PREFIX_SIZE: usize = 8;

/// Initial read buffer capacity for [`FrameReader`].
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Flags carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Flag indicating the payload is LZ4 compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;

    /// Empty flags.
    pub fn new() -> Self {
        Self(0)
    }

    /// Flags from a raw header byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw header byte.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Whether the payload is compressed.
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Return a copy with the compressed bit set or cleared.
    pub fn with_compressed(self, compressed: bool) -> Self {
        if compressed {
            Self(self.0 | Self::COMPRESSED)
        } else {
            Self(self.0 & !Self::COMPRESSED)
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Flags as they appeared on the wire.
    pub flags: FrameFlags,
    /// The payload, always in uncompressed form.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame around an uncompressed payload.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            flags: FrameFlags::new(),
            payload,
        }
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    compression_enabled: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec with compression enabled.
    pub fn new() -> Self {
        Self {
            compression_enabled: true,
        }
    }

    /// Codec that never compresses. It still decodes compressed frames.
    pub fn without_compression() -> Self {
        Self {
            compression_enabled: false,
        }
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;

        if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() + FRAME_HEADER_SIZE,
                max: MAX_FRAME_SIZE,
            });
        }

        let compressed = if self.compression_enabled && payload.len() > COMPRESSION_THRESHOLD {
            Some(lz4_flex::compress_prepend_size(payload)).filter(|c| c.len() < payload.len())
        } else {
            None
        };

        let (body, flags) = match compressed {
            Some(ref c) => (c.as_slice(), frame.flags.with_compressed(true)),
            None => (payload.as_slice(), frame.flags.with_compressed(false)),
        };

        let content_len = 1 + body.len();
        let mut output = Vec::with_capacity(PREFIX_SIZE + content_len);
        output.extend_from_slice(&FRAME_MAGIC);
        output.extend_from_slice(&(content_len as u32).to_be_bytes());
        output.push(flags.as_byte());
        output.extend_from_slice(body);

        Ok(output)
    }

    /// Decode one frame from the start of `data`.
    ///
    /// Returns the frame and the number of bytes consumed. Fails if `data`
    /// does not hold a complete frame.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => Err(ProtocolError::Deserialization(format!(
                "incomplete frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Decode one frame if `data` holds a complete one.
    ///
    /// Returns `Ok(None)` when more bytes are needed, which is the normal
    /// case while a frame is still arriving on a stream.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        let content_len = match parse_prefix(data)? {
            Some(len) => len,
            None => return Ok(None),
        };

        let total = PREFIX_SIZE + content_len;
        if data.len() < total {
            return Ok(None);
        }

        let flags = FrameFlags::from_byte(data[PREFIX_SIZE]);
        let body = &data[FRAME_HEADER_SIZE..total];

        let payload = if flags.is_compressed() {
            lz4_flex::decompress_size_prepended(body).map_err(|e| {
                ProtocolError::Deserialization(format!("failed to decompress payload: {}", e))
            })?
        } else {
            body.to_vec()
        };

        Ok(Some((Frame { flags, payload }, total)))
    }

    /// Encode an envelope straight into frame bytes.
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let payload = envelope.to_msgpack()?;
        self.encode(&Frame::new(payload))
    }
}

/// Validates the magic and returns the content length, or `None` if the
/// header has not fully arrived.
fn parse_prefix(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let magic = [data[0], data[1], data[2], data[3]];
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::InvalidFrameMagic {
            expected: u32::from_be_bytes(FRAME_MAGIC),
            got: u32::from_be_bytes(magic),
        });
    }

    let content_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if PREFIX_SIZE + content_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: PREFIX_SIZE + content_len,
            max: MAX_FRAME_SIZE,
        });
    }
    if content_len < 1 {
        return Err(ProtocolError::Deserialization(
            "invalid frame: content length must be at least 1 for flags byte".to_string(),
        ));
    }

    Ok(Some(content_len))
}

/// Reads envelopes from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            codec: FrameCodec::new(),
        }
    }

    /// Read the next envelope.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames. A stream
    /// that ends in the middle of a frame is a `ConnectionClosed` error.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>> {
        loop {
            if let Some((frame, consumed)) = self.codec.try_decode(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some(Envelope::from_msgpack(&frame.payload)?));
            }

            let read = self.inner.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::ConnectionClosed(format!(
                    "stream ended with {} bytes of a partial frame",
                    self.buffer.len()
                )));
            }
        }
    }
}

/// Writes envelopes to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
    codec: FrameCodec,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            codec: FrameCodec::new(),
        }
    }

    /// Encode, write and flush one envelope.
    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let bytes = self.codec.encode_envelope(envelope)?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
