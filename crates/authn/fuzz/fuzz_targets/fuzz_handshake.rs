//! Fuzz target for handshake event parsing.
//!
//! Feeds arbitrary bytes as the raw gateway event. Every input must end in
//! either a parsed request or `Err(AuthError)`; extracting the token and
//! method ARN from a parsed request must not panic either.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wsgate_authn::HandshakeRequest;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = HandshakeRequest::from_slice(data) else {
        return;
    };

    let _ = request.ensure_handshake();
    let _ = request.token();
    let _ = request.connection_id();

    if let Ok(arn) = request.method_arn() {
        let _ = arn.execution_resource_wildcard();
    }
});
