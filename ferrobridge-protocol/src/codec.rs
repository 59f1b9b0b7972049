//! Codecs for length-prefixed messages and multiplexer frames

use crate::constants::MAX_MUX_FRAME_SIZE;
use crate::frame::MuxFrame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const LEN_PREFIX: usize = 4;

/// Length-prefixed message codec
///
/// Every message is a signed 32-bit little-endian length followed by that
/// many content bytes. Negative lengths and lengths above the configured
/// maximum are rejected.
///
/// ```text
/// ┌──────────────┬──────────────┐
/// │ Length (i32) │ Content      │
/// │ 4 bytes LE   │ N bytes      │
/// └──────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LenPrefixCodec {
    max_len: usize,
}

impl LenPrefixCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Validate a length prefix read off the wire.
    pub fn check_len(&self, raw: i32) -> io::Result<usize> {
        match usize::try_from(raw) {
            Ok(len) if len <= self.max_len => Ok(len),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("read length error: {raw} (max: {})", self.max_len),
            )),
        }
    }

    /// Encode `content` into a standalone buffer.
    pub fn frame(&mut self, content: &[u8]) -> io::Result<Bytes> {
        let mut dst = BytesMut::with_capacity(LEN_PREFIX + content.len());
        self.encode(content, &mut dst)?;
        Ok(dst.freeze())
    }
}

impl Default for LenPrefixCodec {
    fn default() -> Self {
        Self::new(crate::validation::DEFAULT_MAX_MESSAGE_LEN)
    }
}

impl Decoder for LenPrefixCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LEN_PREFIX];
        length_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let len = self.check_len(i32::from_le_bytes(length_bytes))?;

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl<'a> Encoder<&'a [u8]> for LenPrefixCodec {
    type Error = io::Error;

    fn encode(&mut self, content: &'a [u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = i32::try_from(content.len())
            .ok()
            .filter(|_| content.len() <= self.max_len)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("message too large: {} bytes", content.len()),
                )
            })?;
        dst.reserve(LEN_PREFIX + content.len());
        dst.put_i32_le(len);
        dst.put_slice(content);
        Ok(())
    }
}

/// Multiplexer frame codec
///
/// Frames are a 4-byte little-endian length followed by the bincode encoding
/// of a [`MuxFrame`].
#[derive(Debug, Clone, Copy)]
pub struct MuxCodec {
    max_frame_size: usize,
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_MUX_FRAME_SIZE as usize,
        }
    }
}

impl MuxCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for MuxCodec {
    type Item = MuxFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LEN_PREFIX];
        length_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let frame_length = u32::from_le_bytes(length_bytes) as usize;

        if frame_length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame too large: {frame_length} bytes (max: {})",
                    self.max_frame_size
                ),
            ));
        }

        if src.len() < LEN_PREFIX + frame_length {
            src.reserve(LEN_PREFIX + frame_length - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let frame_bytes = src.split_to(frame_length);

        let (frame, _) =
            bincode_next::serde::decode_from_slice(&frame_bytes, bincode_next::config::standard())
                .map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
                })?;

        Ok(Some(frame))
    }
}

impl Encoder<MuxFrame> for MuxCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: MuxFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let buf = bincode_next::serde::encode_to_vec(&frame, bincode_next::config::standard())
            .map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
            })?;

        if buf.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame too large: {} bytes (max: {})",
                    buf.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LEN_PREFIX + buf.len());
        dst.put_u32_le(buf.len() as u32);
        dst.put_slice(&buf);
        Ok(())
    }
}
