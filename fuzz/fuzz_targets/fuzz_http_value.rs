//! Fuzz target for the cache value layout.
//!
//! Corrupt stored bytes must make `link` return false, never panic.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use velo_cache::HttpValue;

fuzz_target!(|data: &[u8]| {
    let stored = Bytes::copy_from_slice(data);
    let mut value = HttpValue::new();
    if value.link(&stored) {
        // Linked values must be fully extractable.
        let _ = value.extract_headers();
        let _ = value.body_bytes();
    }
});
