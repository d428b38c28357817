//! Property-based tests using proptest
//!
//! The decoder must produce the same frames no matter how the byte stream
//! is chopped up by the transport.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use packet_socket::core::codec::FrameCodec;
use packet_socket::core::packet::encode_frame;
use packet_socket::{PacketReader, PacketWriter};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn wire(payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for p in payloads {
        encode_frame(p, &mut buf).unwrap();
    }
    buf.to_vec()
}

fn decode_in_chunks(stream: &[u8], cuts: &[usize], allow_zero: bool) -> Vec<Bytes> {
    let mut codec = FrameCodec::new(1 << 20, allow_zero);
    let mut buf = BytesMut::new();
    let mut out = Vec::new();

    let mut start = 0;
    let mut bounds: Vec<usize> = cuts.iter().map(|c| c % (stream.len() + 1)).collect();
    bounds.sort_unstable();
    bounds.push(stream.len());

    for end in bounds {
        buf.extend_from_slice(&stream[start..end.max(start)]);
        start = end.max(start);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
    }
    out
}

// Property: chunking of the byte stream never changes the decoded frames
proptest! {
    #[test]
    fn prop_decode_is_split_invariant(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..2048), 1..16),
        cuts in prop::collection::vec(any::<usize>(), 0..32),
    ) {
        let stream = wire(&payloads);
        let frames = decode_in_chunks(&stream, &cuts, false);

        prop_assert_eq!(frames.len(), payloads.len());
        for (frame, payload) in frames.iter().zip(&payloads) {
            prop_assert_eq!(&frame[..], &payload[..]);
        }
    }
}

// Property: zero-length frames keep their place in the sequence when allowed
proptest! {
    #[test]
    fn prop_empty_frames_preserved_when_allowed(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..32),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let stream = wire(&payloads);
        let frames = decode_in_chunks(&stream, &cuts, true);

        prop_assert_eq!(frames.len(), payloads.len());
        for (frame, payload) in frames.iter().zip(&payloads) {
            prop_assert_eq!(&frame[..], &payload[..]);
        }
    }
}

// Property: any length above the limit is rejected before payload bytes arrive
proptest! {
    #[test]
    fn prop_oversize_prefix_rejected(max in 1usize..4096, excess in 1u32..1_000_000) {
        let length = max as u32 + excess;
        let mut codec = FrameCodec::new(max, false);
        let mut buf = BytesMut::from(&length.to_le_bytes()[..]);
        prop_assert!(codec.decode(&mut buf).is_err());
    }
}

// Property: tagged payload fields read back in the order they were written
proptest! {
    #[test]
    fn prop_writer_reader_agree(tag in any::<u8>(), id in any::<i32>(), text in ".{0,300}") {
        let mut writer = PacketWriter::new();
        writer.write_u8(tag).write_i32(id).write_string(&text);

        let mut reader = PacketReader::new(writer.as_slice());
        prop_assert_eq!(reader.read_u8().unwrap(), tag);
        prop_assert_eq!(reader.read_i32().unwrap(), id);
        prop_assert_eq!(reader.read_string().unwrap(), text);
        prop_assert!(reader.is_empty());
    }
}
