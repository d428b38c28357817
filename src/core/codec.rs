//! Streaming frame codec.
//!
//! [`FrameCodec`] is the receive state machine in isolation: it consumes
//! whatever bytes the transport produced, remembers which phase it is in,
//! and yields one payload at a time.
//!
//! ```text
//! ReadingLength --4 bytes--> ReadingPayload{length} --length bytes--> ReadingLength
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::DEFAULT_MAX_PACKET_SIZE;
use crate::core::packet::{check_length, decode_length, encode_frame, LENGTH_PREFIX_SIZE};
use crate::error::{ProtocolError, Result};

/// Where the decoder is inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// Accumulating the 4-byte length prefix
    ReadingLength,
    /// Prefix parsed; accumulating `length` payload bytes
    ReadingPayload { length: usize },
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_packet_size: usize,
    allow_zero_length: bool,
    phase: DecodePhase,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE, false)
    }
}

impl FrameCodec {
    pub fn new(max_packet_size: usize, allow_zero_length: bool) -> Self {
        Self {
            max_packet_size,
            allow_zero_length,
            phase: DecodePhase::ReadingLength,
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn allow_zero_length(&self) -> bool {
        self.allow_zero_length
    }

    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// Payload bytes still missing for the current phase, given what is buffered
    pub fn remaining(&self, buffered: usize) -> usize {
        match self.phase {
            DecodePhase::ReadingLength => LENGTH_PREFIX_SIZE.saturating_sub(buffered),
            DecodePhase::ReadingPayload { length } => length.saturating_sub(buffered),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let DecodePhase::ReadingLength = self.phase {
            if src.len() < LENGTH_PREFIX_SIZE {
                src.reserve(LENGTH_PREFIX_SIZE - src.len());
                return Ok(None);
            }

            let length = decode_length(&[src[0], src[1], src[2], src[3]]) as usize;
            // Validate before consuming or reserving anything for the payload
            check_length(length, self.max_packet_size, self.allow_zero_length)?;
            src.advance(LENGTH_PREFIX_SIZE);

            if length == 0 {
                trace!("Empty frame decoded");
                return Ok(Some(Bytes::new()));
            }
            self.phase = DecodePhase::ReadingPayload { length };
        }

        let DecodePhase::ReadingPayload { length } = self.phase else {
            return Ok(None);
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.phase = DecodePhase::ReadingLength;
        let payload = src.split_to(length).freeze();
        trace!(bytes = length, "Frame decoded");
        Ok(Some(payload))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.phase == DecodePhase::ReadingLength => Ok(None),
            None => Err(ProtocolError::ConnectionReset),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        encode_frame(item, dst)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn encoded(payloads: &[&[u8]]) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        for p in payloads {
            codec.encode(*p, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_decode_across_single_byte_reads() {
        let wire = encoded(&[b"alpha", b"be"]);
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();

        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                out.push(frame);
            }
        }

        assert_eq!(out, vec![Bytes::from_static(b"alpha"), Bytes::from_static(b"be")]);
        assert_eq!(codec.phase(), DecodePhase::ReadingLength);
    }

    #[test]
    fn test_phase_tracks_partial_payload() {
        let wire = encoded(&[b"abcdef"]);
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&wire[..6]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.phase(), DecodePhase::ReadingPayload { length: 6 });
        assert_eq!(codec.remaining(buf.len()), 4);

        buf.extend_from_slice(&wire[6..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), &b"abcdef"[..]);
    }

    #[test]
    fn test_oversize_rejected_without_reserving_payload() {
        let mut codec = FrameCodec::new(1024, false);
        let mut buf = BytesMut::from(&(1_000_000u32).to_le_bytes()[..]);
        let capacity = buf.capacity();

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolViolation(_)));
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_zero_length_policy() {
        let wire = encoded(&[b""]);

        let mut strict = FrameCodec::new(16, false);
        assert!(strict.decode(&mut wire.clone()).is_err());

        let mut lenient = FrameCodec::new(16, true);
        let mut buf = wire.clone();
        assert_eq!(lenient.decode(&mut buf).unwrap(), Some(Bytes::new()));
        assert!(buf.is_empty());
        assert_eq!(lenient.phase(), DecodePhase::ReadingLength);
    }

    #[test]
    fn test_max_size_boundary_is_inclusive() {
        let payload = vec![1u8; 64];
        let wire = encoded(&[&payload]);
        let mut codec = FrameCodec::new(64, false);
        assert_eq!(codec.decode(&mut wire.clone()).unwrap().unwrap().len(), 64);

        let mut codec = FrameCodec::new(63, false);
        assert!(codec.decode(&mut wire.clone()).is_err());
    }

    #[test]
    fn test_decode_eof_with_partial_frame_is_reset() {
        let wire = encoded(&[b"abc"]);
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&wire[..5]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::ConnectionReset)
        ));

        let mut codec = FrameCodec::default();
        assert!(codec.decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }
}
