//! SHA-256 helpers producing the 64-character lowercase hex form used
//! everywhere on the wire.

use sha2::{Digest, Sha256};

/// SHA-256 of `input` as 64-character lowercase hex.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Content-addressed post id: hash of `text|timestamp`.
///
/// The id is fully determined by `(text, timestamp)`, so duplicate
/// submissions collapse to one entry.
pub fn post_id(text: &str, timestamp: u64) -> String {
    sha256_hex(format!("{text}|{timestamp}").as_bytes())
}

/// Shared topic identifier derived from a fixed protocol version string.
/// All participants compute the same value; there is no registration step.
pub fn topic_hex(protocol_version: &str) -> String {
    sha256_hex(protocol_version.as_bytes())
}
