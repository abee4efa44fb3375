#![no_main]

use bytes::{Buf, BytesMut};
use pgbridge::protocol::decode::decode_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // several backend messages may arrive in one read
    while !buf.is_empty() {
        match decode_message(&mut buf) {
            Ok(Some((_, consumed))) => {
                assert!(consumed > 0 && consumed <= buf.len());
                buf.advance(consumed);
            }
            Ok(None) | Err(_) => break,
        }
    }
});
