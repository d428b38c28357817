use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{constants, ProtocolError, Result};

/// Size of the length prefix in front of every payload
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload the wire format can describe
pub const MAX_WIRE_LENGTH: usize = u32::MAX as usize;

/// A single decoded payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }

    /// Encode prefix and payload into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let prefix = encode_length(self.payload.len())?;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&prefix);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse exactly one complete frame from `data`.
    ///
    /// The declared length is checked against `max_packet_size` before the
    /// payload is copied. Trailing bytes after the frame are rejected.
    pub fn from_bytes(data: &[u8], max_packet_size: usize) -> Result<Self> {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Err(ProtocolError::ProtocolViolation(format!(
                "Truncated length prefix: {} of {LENGTH_PREFIX_SIZE} bytes",
                data.len()
            )));
        }

        let length = decode_length(&[data[0], data[1], data[2], data[3]]) as usize;
        check_length(length, max_packet_size, true)?;

        let body = &data[LENGTH_PREFIX_SIZE..];
        if body.len() != length {
            return Err(ProtocolError::ProtocolViolation(format!(
                "Declared length {length} does not match {} payload bytes",
                body.len()
            )));
        }

        Ok(Self::new(Bytes::copy_from_slice(body)))
    }
}

impl From<Bytes> for Frame {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

/// Encode a payload length as the 4-byte prefix
#[inline]
pub fn encode_length(length: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let length = u32::try_from(length).map_err(|_| {
        ProtocolError::ProtocolViolation(constants::ERR_FRAME_TOO_LARGE_FOR_WIRE.to_string())
    })?;
    Ok(length.to_le_bytes())
}

/// Decode the 4-byte prefix into the declared payload length
#[inline]
pub fn decode_length(header: &[u8; LENGTH_PREFIX_SIZE]) -> u32 {
    u32::from_le_bytes(*header)
}

/// Validate a declared length against the receive policy.
pub fn check_length(length: usize, max_packet_size: usize, allow_zero_length: bool) -> Result<()> {
    if length > max_packet_size {
        return Err(ProtocolError::ProtocolViolation(format!(
            "Payload size exceeded max allowed [{length} > {max_packet_size}]"
        )));
    }
    if length == 0 && !allow_zero_length {
        return Err(ProtocolError::ProtocolViolation(
            constants::ERR_ZERO_LENGTH_FRAME.to_string(),
        ));
    }
    Ok(())
}

/// Append `[length][payload]` to `dst`
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let prefix = encode_length(payload.len())?;
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&prefix);
    dst.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_length_prefix_is_little_endian() {
        assert_eq!(encode_length(0x0102_0304).unwrap(), [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(decode_length(&[0x04, 0x03, 0x02, 0x01]), 0x0102_0304);
    }

    #[test]
    fn test_encode_frame_layout() {
        let mut buf = BytesMut::new();
        encode_frame(b"hey", &mut buf).unwrap();
        assert_eq!(&buf[..], &[3, 0, 0, 0, b'h', b'e', b'y']);
    }

    #[test]
    fn test_from_bytes_rejects_oversize_before_copy() {
        let mut data = 2048u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]);
        let err = Frame::from_bytes(&data, 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolViolation(_)));
    }

    #[test]
    fn test_from_bytes_rejects_truncated_and_trailing() {
        assert!(Frame::from_bytes(&[1, 0], 16).is_err());
        assert!(Frame::from_bytes(&[2, 0, 0, 0, 9], 16).is_err());
        assert!(Frame::from_bytes(&[1, 0, 0, 0, 9, 9], 16).is_err());
    }

    #[test]
    fn test_check_length_policy() {
        assert!(check_length(0, 10, true).is_ok());
        assert!(check_length(0, 10, false).is_err());
        assert!(check_length(10, 10, false).is_ok());
        assert!(check_length(11, 10, false).is_err());
    }

    #[test]
    fn test_frame_to_bytes_matches_encode_frame() {
        let frame = Frame::new(vec![7u8; 5]);
        let mut buf = BytesMut::new();
        encode_frame(&frame.payload, &mut buf).unwrap();
        assert_eq!(frame.to_bytes().unwrap(), buf.to_vec());
        assert_eq!(frame.encoded_len(), 9);
    }
}
