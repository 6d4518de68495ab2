//! Stable content digests used for ids, seeds and schema hashes

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Hex-encoded SHA-256 over `parts`, each part separated by a unit separator
/// so that `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part);
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

/// First 16 hex characters of [`sha256_hex`]
pub fn short_digest(parts: &[&[u8]]) -> String {
    let mut full = sha256_hex(parts);
    full.truncate(16);
    full
}
