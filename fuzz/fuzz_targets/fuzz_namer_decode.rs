//! Fuzz target for content-addressed leaf decoding.
//!
//! Tests that decode handles arbitrary leaves without panicking and
//! that decode-then-encode is the identity on accepted input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use velo_types::ResourceNamer;

fuzz_target!(|data: &[u8]| {
    if let Ok(leaf) = std::str::from_utf8(data) {
        if let Some(namer) = ResourceNamer::decode(leaf) {
            // Anything decode accepts must re-encode to something
            // decode accepts again, with the same fields.
            let reencoded = namer.encode();
            let again = ResourceNamer::decode(&reencoded).expect("re-decode");
            assert_eq!(again, namer);
        }
    }
});
