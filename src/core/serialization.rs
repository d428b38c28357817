//! # Payload Convention
//!
//! The core never looks inside a payload. Applications built on the frames
//! share a small binary convention, and this module provides both sides of it:
//!
//! - first byte: message-kind tag
//! - fixed-width integers: little-endian
//! - strings: 7-bit variable-length byte count followed by UTF-8 bytes
//! - blobs: `u32` byte count followed by raw bytes
//! - objects: any `serde` type as a bincode blob
//!
//! ## Usage
//! ```rust
//! use packet_socket::core::serialization::{PacketReader, PacketWriter};
//!
//! let mut writer = PacketWriter::new();
//! writer.write_u8(0).write_string("alice");
//! let payload = writer.into_bytes();
//!
//! let mut reader = PacketReader::new(&payload);
//! assert_eq!(reader.read_u8().unwrap(), 0);
//! assert_eq!(reader.read_string().unwrap(), "alice");
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{constants, ProtocolError, Result};

/// Builds a payload field by field
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    /// Write a string with a 7-bit encoded byte-count prefix
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_7bit_length(value.len());
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Write a blob with a `u32` byte-count prefix
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<&mut Self> {
        let len = u32::try_from(value.len()).map_err(|_| {
            ProtocolError::ProtocolViolation(constants::ERR_FRAME_TOO_LARGE_FOR_WIRE.to_string())
        })?;
        self.buf.put_u32_le(len);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Serialize `value` with bincode and write it as a blob
    pub fn write_object<T: Serialize>(&mut self, value: &T) -> Result<&mut Self> {
        let encoded = bincode::serialize(value)?;
        self.write_bytes(&encoded)
    }

    fn write_7bit_length(&mut self, mut value: usize) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads fields back out of a payload; every read is bounds-checked
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::MalformedPayload(format!(
                "{}: need {n} bytes at offset {}, have {}",
                constants::ERR_UNEXPECTED_END,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_7bit_length()?;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_INVALID_UTF8.to_string()))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_object<T: DeserializeOwned>(&mut self) -> Result<T> {
        let raw = self.read_bytes()?;
        Ok(bincode::deserialize(raw)?)
    }

    /// Everything not yet consumed
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    fn read_7bit_length(&mut self) -> Result<usize> {
        let mut value: usize = 0;
        // 5 groups cover a 32-bit count
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::MalformedPayload(
            constants::ERR_VARINT_OVERFLOW.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_short_string_prefix_is_one_byte() {
        let mut w = PacketWriter::new();
        w.write_string("hi");
        assert_eq!(w.as_slice(), &[2, b'h', b'i']);
    }

    #[test]
    fn test_long_string_uses_multi_byte_prefix() {
        let text = "x".repeat(300);
        let mut w = PacketWriter::new();
        w.write_string(&text);
        // 300 = 0b10_0101100 -> 0xAC 0x02
        assert_eq!(&w.as_slice()[..2], &[0xAC, 0x02]);

        let bytes = w.into_bytes();
        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), text);
        assert!(r.is_empty());
    }

    #[test]
    fn test_mixed_fields_in_order() {
        let mut w = PacketWriter::new();
        w.write_u8(2).write_i32(-7).write_string("hi").write_bool(true);
        w.write_u64(u64::MAX);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 2);
        assert_eq!(r.read_i32().unwrap(), -7);
        assert_eq!(r.read_string().unwrap(), "hi");
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn test_underflow_is_malformed_payload() {
        let mut r = PacketReader::new(&[1, 2]);
        assert!(matches!(r.read_i32(), Err(ProtocolError::MalformedPayload(_))));
        // failed read does not consume
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut r = PacketReader::new(&[2, 0xFF, 0xFE]);
        assert!(matches!(r.read_string(), Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_unterminated_varint_rejected() {
        let mut r = PacketReader::new(&[0xFF; 8]);
        assert!(r.read_string().is_err());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    #[test]
    fn test_object_blob() {
        let profile = Profile {
            id: 7,
            name: "alice".into(),
        };
        let mut w = PacketWriter::new();
        w.write_u8(9).write_object(&profile).unwrap();
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 9);
        assert_eq!(r.read_object::<Profile>().unwrap(), profile);
    }
}
