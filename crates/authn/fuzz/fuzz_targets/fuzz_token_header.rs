//! Fuzz target for unverified token header decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wsgate_authn::{jwt::decode_unverified_header, validation::validate_kid, validate_algorithm};

fuzz_target!(|data: &[u8]| {
    // Tokens arrive as query-string values, always UTF-8.
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(header) = decode_unverified_header(token) {
        // Anything accepted must survive re-validation.
        assert!(validate_kid(&header.kid).is_ok());
        assert!(validate_algorithm(&format!("{:?}", header.algorithm)).is_ok());
    }
});
