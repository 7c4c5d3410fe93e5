//! Fuzz target for snapshot stream parsing.
//!
//! Raw input mostly fails the checksum, so the target also compresses the
//! input behind a valid magic and appends a matching footer. The parser
//! must reject malformed sections without panicking or allocating
//! unbounded memory on a hostile length prefix.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sha2::{Digest, Sha256};
use vellum_raft::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION, SnapshotImage};

fuzz_target!(|data: &[u8]| {
    let _ = SnapshotImage::read_from(data);

    let mut body = SNAPSHOT_MAGIC.to_vec();
    body.extend_from_slice(&[SNAPSHOT_VERSION, 0]);
    body.extend_from_slice(data);
    let Ok(mut stream) = zstd::encode_all(body.as_slice(), 1) else {
        return;
    };
    let footer: [u8; 32] = Sha256::digest(&stream).into();
    stream.extend_from_slice(&footer);

    if let Ok(image) = SnapshotImage::read_from(stream.as_slice()) {
        let _ = image.event_count();
    }
});
