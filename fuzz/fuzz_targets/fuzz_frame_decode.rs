#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use packet_socket::core::codec::FrameCodec;
use packet_socket::core::packet::Frame;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary input must never panic or yield a frame above the limit
    let _ = Frame::from_bytes(data, 4096);

    let mut codec = FrameCodec::new(4096, data.first().is_some_and(|b| b & 1 == 1));
    let mut buf = BytesMut::new();
    for chunk in data.chunks(7) {
        buf.extend_from_slice(chunk);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => assert!(frame.len() <= 4096),
                Ok(None) | Err(_) => break,
            }
        }
    }
});
