//! Content digests in the repository's `{algorithm}value` notation.

use sha2::{Digest, Sha256};

const SHA256_PREFIX: &str = "{sha-256}";

/// SHA-256 digest of `data`, formatted as `{sha-256}<lowercase hex>`.
pub fn sha256_content_hash(data: &[u8]) -> String {
    format!("{}{:x}", SHA256_PREFIX, Sha256::digest(data))
}

/// Outcome of checking downloaded bytes against the advertised hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCheck {
    /// Digest recomputed and equal
    Verified,
    /// Hash is an opaque version stamp that cannot be recomputed locally
    Unverifiable,
    /// Digest recomputed and different
    Mismatch { actual: String },
}

/// Compares `data` with an advertised content hash.
///
/// Only SHA-256 digests are recomputed; any other value is treated as an
/// opaque stamp.
pub fn verify_content(expected: &str, data: &[u8]) -> ContentCheck {
    let Some(hex) = expected.strip_prefix(SHA256_PREFIX) else {
        return ContentCheck::Unverifiable;
    };

    let actual = sha256_content_hash(data);
    if actual[SHA256_PREFIX.len()..].eq_ignore_ascii_case(hex) {
        ContentCheck::Verified
    } else {
        ContentCheck::Mismatch { actual }
    }
}
