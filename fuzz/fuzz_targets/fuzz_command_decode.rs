//! Fuzz target for replicated command decoding.
//!
//! Arbitrary log entry payloads must never panic the decoder, and any
//! payload that decodes must re-encode to a payload that decodes to the
//! same command.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vellum_raft::Command;

fuzz_target!(|data: &[u8]| {
    let Ok(command) = Command::decode(data) else {
        return;
    };

    let encoded = command.encode();
    assert!(encoded.is_ok(), "encode failed after successful decode");
    let decoded = Command::decode(&encoded.expect("already checked"));
    assert_eq!(decoded.ok(), Some(command), "roundtrip mismatch");
});
