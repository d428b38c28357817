#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_socket::PacketReader;

fuzz_target!(|data: &[u8]| {
    let mut reader = PacketReader::new(data);
    while !reader.is_empty() {
        let ok = match reader.read_u8() {
            Ok(0) => reader.read_string().is_ok(),
            Ok(1) => reader.read_i32().is_ok(),
            Ok(2) => reader.read_bytes().is_ok(),
            Ok(_) => reader.read_u64().is_ok(),
            Err(_) => false,
        };
        if !ok {
            break;
        }
    }
});
