//! Fuzz target for the on-disk log entry format.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vellum_store::LogEntry;
use vellum_types::codec::{decode, encode};

fuzz_target!(|data: &[u8]| {
    if let Ok(entry) = decode::<LogEntry>(data) {
        let re_encoded = encode(&entry);
        assert!(re_encoded.is_ok(), "encode failed after successful decode");
        let re_decoded = decode::<LogEntry>(&re_encoded.expect("already checked"));
        assert_eq!(re_decoded.ok(), Some(entry), "roundtrip mismatch");
    }
});
