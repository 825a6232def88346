//! Content fingerprint of `tasks.jsonl`.
//!
//! The SHA-256 of the raw file bytes is the only signal used to decide
//! whether the SQLite cache matches the source file.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{:x}", hash)
}
