//! Fuzz target for response header block parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use velo_cache::ResponseHeaders;

fuzz_target!(|data: &[u8]| {
    if let Ok(headers) = ResponseHeaders::from_block(data) {
        // Parsed headers must serialize and re-parse.
        let block = headers.to_block();
        let again = ResponseHeaders::from_block(&block).expect("re-parse");
        assert_eq!(again.status(), headers.status());
    }
});
