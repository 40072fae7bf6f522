//! Transport frame codec for the bridge protocol.
//!
//! Every message on the channel is `{ u32 type tag; u32 byte length;
//! length bytes of payload }`, little-endian. The codec only splits the
//! stream into frames; bodies are decoded positionally by the session.
//!
//! Inbound frames keep their raw type tag so unknown message types reach
//! the dispatcher, which logs and drops them without ending the session.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::session::Outbound;

/// Frame header size: type tag plus byte length.
pub const HEADER_LEN: usize = 8;

/// Default maximum payload length (64 MiB).
///
/// Array payloads and uncompressed frame channels dominate message sizes;
/// the cap prevents unbounded allocation from a corrupt length field.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 64 * 1024 * 1024;

/// Errors raised by the frame codec.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A frame declared a payload larger than the configured maximum.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    OversizedFrame { size: usize, max: usize },

    /// The peer closed the connection inside a frame header.
    #[error("connection closed mid-header: received {received} of {HEADER_LEN} header bytes")]
    EofMidHeader { received: usize },

    /// The peer closed the connection inside a frame payload.
    #[error("connection closed mid-frame: received {received} of {expected} payload bytes")]
    EofMidFrame { received: usize, expected: usize },
}

impl From<FramingError> for io::Error {
    fn from(err: FramingError) -> Self {
        let kind = match err {
            FramingError::OversizedFrame { .. } => io::ErrorKind::InvalidData,
            FramingError::EofMidHeader { .. } | FramingError::EofMidFrame { .. } => {
                io::ErrorKind::UnexpectedEof
            }
        };
        io::Error::new(kind, err)
    }
}

/// One inbound message as delivered by the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    /// Raw type tag from the frame header.
    pub kind: u32,
    pub payload: Bytes,
}

/// Decoder splitting the inbound byte stream into [`WireMessage`]s.
#[derive(Debug)]
pub struct MessageDecoder {
    max_message_length: usize,
}

impl MessageDecoder {
    #[must_use]
    pub fn new(max_message_length: usize) -> Self {
        Self { max_message_length }
    }
}

impl Default for MessageDecoder {
    fn default() -> Self { Self::new(DEFAULT_MAX_MESSAGE_LENGTH) }
}

impl Decoder for MessageDecoder {
    type Item = WireMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }
        let kind = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > self.max_message_length {
            return Err(FramingError::OversizedFrame {
                size: len,
                max: self.max_message_length,
            }
            .into());
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(WireMessage { kind, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Clean close: the stream ended on a frame boundary.
        if src.is_empty() {
            return Ok(None);
        }
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        Err(build_eof_error(src))
    }
}

/// Classify a truncated stream as mid-header or mid-frame.
fn build_eof_error(src: &BytesMut) -> io::Error {
    if src.len() < HEADER_LEN {
        return FramingError::EofMidHeader {
            received: src.len(),
        }
        .into();
    }
    let expected = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
    FramingError::EofMidFrame {
        received: src.len() - HEADER_LEN,
        expected,
    }
    .into()
}

/// Encoder framing outbound `{type, payload}` pairs.
#[derive(Debug)]
pub struct MessageEncoder {
    max_message_length: usize,
}

impl MessageEncoder {
    #[must_use]
    pub fn new(max_message_length: usize) -> Self {
        Self { max_message_length }
    }
}

impl Default for MessageEncoder {
    fn default() -> Self { Self::new(DEFAULT_MAX_MESSAGE_LENGTH) }
}

impl Encoder<Outbound> for MessageEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_message_length {
            return Err(FramingError::OversizedFrame {
                size: item.payload.len(),
                max: self.max_message_length,
            }
            .into());
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32_le(item.kind as u32);
        dst.put_u32_le(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::MessageType;

    fn encode(kind: MessageType, payload: &[u8]) -> BytesMut {
        let mut dst = BytesMut::new();
        MessageEncoder::default()
            .encode(Outbound::new(kind, Bytes::copy_from_slice(payload)), &mut dst)
            .expect("encode");
        dst
    }

    #[rstest]
    fn encoded_header_is_little_endian_type_then_length() {
        let dst = encode(MessageType::FrameIsReady, &[0xaa, 0xbb]);
        assert_eq!(&dst[0..4], &(MessageType::FrameIsReady as u32).to_le_bytes());
        assert_eq!(&dst[4..8], &2u32.to_le_bytes());
        assert_eq!(&dst[8..], &[0xaa, 0xbb]);
    }

    #[rstest]
    fn decode_round_trips_encoded_frames() {
        let mut src = encode(MessageType::SetParam, b"payload");
        let frame = MessageDecoder::default()
            .decode(&mut src)
            .expect("decode")
            .expect("complete frame");
        assert_eq!(frame.kind, MessageType::SetParam as u32);
        assert_eq!(frame.payload.as_ref(), b"payload");
        assert!(src.is_empty());
    }

    #[rstest]
    fn decode_waits_for_full_header_and_payload() {
        let full = encode(MessageType::CommitParams, &[1, 2, 3, 4]);
        let mut decoder = MessageDecoder::default();

        let mut partial = BytesMut::from(&full[..5]);
        assert!(decoder.decode(&mut partial).expect("decode").is_none());

        let mut partial = BytesMut::from(&full[..10]);
        assert!(decoder.decode(&mut partial).expect("decode").is_none());

        let mut complete = BytesMut::from(&full[..]);
        assert!(decoder.decode(&mut complete).expect("decode").is_some());
    }

    #[rstest]
    fn oversized_frames_are_rejected() {
        let mut decoder = MessageDecoder::new(16);
        let mut src = BytesMut::new();
        src.put_u32_le(MessageType::NewArray as u32);
        src.put_u32_le(17);
        let err = decoder.decode(&mut src).expect_err("oversized");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[rstest]
    fn eof_mid_header_is_distinguished_from_mid_frame() {
        let mut decoder = MessageDecoder::default();

        let mut src = BytesMut::from(&[1u8, 0, 0][..]);
        let err = decoder.decode_eof(&mut src).expect_err("mid-header");
        assert!(err.to_string().contains("mid-header"));

        let full = encode(MessageType::MapArray, &[9; 8]);
        let mut src = BytesMut::from(&full[..12]);
        let err = decoder.decode_eof(&mut src).expect_err("mid-frame");
        assert!(err.to_string().contains("mid-frame"));
    }

    #[rstest]
    fn eof_on_frame_boundary_is_clean() {
        let mut decoder = MessageDecoder::default();
        let mut src = BytesMut::new();
        assert!(decoder.decode_eof(&mut src).expect("clean eof").is_none());
    }
}
