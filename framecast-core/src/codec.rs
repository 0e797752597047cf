//! Length-prefixed frame codec for framed TCP I/O via `tokio_util`.
//!
//! ## Wire format
//!
//! ```text
//! length:   u32  little-endian  (4 bytes)
//! payload:  [u8] (length bytes, an encoded image)
//! ```
//!
//! Repeated back-to-back; no handshake, no checksum, no termination
//! frame — the connection close ends the stream. Zero-length payloads
//! are legal.
//!
//! The prefix itself carries no upper bound, so the codec enforces a
//! configurable ceiling ([`FrameCodec::with_max_frame_len`]) to keep a
//! corrupt stream from driving an unbounded allocation. The ceiling is
//! local hardening only; it does not change the wire format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CastError;

/// Default payload ceiling: 64 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for the `[u32-le length][payload]` frame wire format.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec with the default payload ceiling.
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Create a codec with an explicit payload ceiling in bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// The configured payload ceiling.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = u32::from_le_bytes(src[..LENGTH_PREFIX_SIZE].try_into().expect("4 bytes"))
            as usize;
        if len > self.max_frame_len {
            return Err(CastError::FrameTooLarge {
                size: len,
                max: self.max_frame_len,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + len {
            // Reserve up front so the transport reads the rest in one go.
            src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // Bytes left over at EOF: a partial prefix or a partial
            // payload. Never surface a partial frame.
            None => Err(CastError::StreamClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CastError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_len {
            return Err(CastError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_len,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(payload: &[u8]) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::copy_from_slice(payload), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn roundtrip() {
        let payload = b"hello frame".to_vec();
        let mut buf = encode_one(&payload);

        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), payload.as_slice());
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_zero_length() {
        let mut buf = encode_one(b"");
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE);

        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn wire_layout_is_little_endian() {
        let buf = encode_one(&[0xAA; 5]);
        assert_eq!(&buf[..4], &[5, 0, 0, 0]);
        assert_eq!(&buf[4..], &[0xAA; 5]);
    }

    #[test]
    fn partial_prefix_waits() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[7u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_payload_waits() {
        let mut codec = FrameCodec::new();
        let mut full = encode_one(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut partial = full.split_to(full.len() - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn eof_mid_prefix_is_stream_closed() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[7u8, 0, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(CastError::StreamClosed)
        ));
    }

    #[test]
    fn eof_mid_payload_is_stream_closed() {
        let mut codec = FrameCodec::new();
        let mut full = encode_one(&[9u8; 100]);
        let mut partial = full.split_to(50);
        assert!(matches!(
            codec.decode_eof(&mut partial),
            Err(CastError::StreamClosed)
        ));
    }

    #[test]
    fn eof_on_clean_boundary_is_none() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn length_over_ceiling_rejected() {
        let mut codec = FrameCodec::with_max_frame_len(16);
        let mut buf = BytesMut::new();
        buf.put_u32_le(17);
        buf.extend_from_slice(&[0u8; 17]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CastError::FrameTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn encode_over_ceiling_rejected() {
        let mut codec = FrameCodec::with_max_frame_len(8);
        let mut buf = BytesMut::new();
        let err = codec.encode(Bytes::from(vec![0u8; 9]), &mut buf);
        assert!(matches!(err, Err(CastError::FrameTooLarge { .. })));
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b""), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"third"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"third");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
