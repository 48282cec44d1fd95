//! Fuzz target for the HTML scanner.
//!
//! The scanner must never panic, and untouched tokens must serialize
//! back to the input bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use velo_rewrite::{scan_html, write_tokens};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let tokens = scan_html(input);
        assert_eq!(write_tokens(&tokens), input);
    }
});
