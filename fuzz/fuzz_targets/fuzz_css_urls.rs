//! Fuzz target for CSS url() reference discovery.

#![no_main]

use libfuzzer_sys::fuzz_target;
use velo_rewrite::filter::find_css_urls;

fuzz_target!(|data: &[u8]| {
    if let Ok(css) = std::str::from_utf8(data) {
        for (range, url) in find_css_urls(css) {
            // Ranges must index valid char boundaries inside the input.
            assert!(range.end <= css.len());
            assert!(!url.starts_with("data:"));
            let _ = &css[range];
        }
    }
});
