//! Fuzz target for control request framing.
//!
//! Run with: cargo +nightly fuzz run fuzz_frame_decoder
//!
//! Walks arbitrary bytes through `next_request` the way a connection does,
//! checking that every accepted frame lies inside the buffer and that
//! decoding always makes progress.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::protocol::{HEADER_SIZE, next_request};

const LIMIT: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    while let Ok(Some(request)) = next_request(rest, LIMIT) {
        let len = request.length as usize;
        assert!(len >= HEADER_SIZE);
        assert!(len <= rest.len());
        assert!(len <= LIMIT);
        rest = &rest[len..];
    }
});
