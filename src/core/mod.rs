//! # Core Framing Components
//!
//! Low-level frame handling, the streaming codec, and the payload
//! reader/writer used by applications on top of the frames.
//!
//! ## Components
//! - **Packet**: wire constants and single-frame helpers
//! - **Codec**: Tokio codec that turns a byte stream into frames
//! - **Serialization**: tag / integer / string payload convention
//!
//! ## Wire Format
//! ```text
//! [Length(4, u32 little-endian)] [Payload(Length)]
//! ```
//!
//! No magic number, no version, no checksum.
//!
//! ## Security
//! - The length is validated against the configured maximum before any
//!   payload buffer is reserved
//! - Zero-length frames are rejected unless explicitly allowed

pub mod codec;
pub mod packet;
pub mod serialization;
