//! Content fingerprints for duplicate-upload detection.

use sha2::{Digest, Sha256};

/// SHA-256 over the full byte stream, as a 64-character lowercase hex string.
///
/// The digest is taken over raw bytes, so a re-upload of identical content is
/// detected regardless of filename.
pub fn compute_file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
