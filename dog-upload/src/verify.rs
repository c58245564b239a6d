//! Integrity verification of part payloads.
//!
//! Parts are content-addressed by SHA-256. A part is accepted only when the
//! digest of its bytes equals the hash the sender declared for it; the hex
//! comparison is case-insensitive.

use sha2::{Digest, Sha256};

use crate::{PartHash, UploadError, UploadResult};

/// Lowercase hex SHA-256 of `payload`
pub fn digest_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Confirm `payload` hashes to `declared`, returning the normalized hash.
pub fn verify(payload: &[u8], declared: &str) -> UploadResult<PartHash> {
    let computed = digest_hex(payload);
    match PartHash::parse(declared) {
        Some(hash) if hash.as_str() == computed => Ok(hash),
        _ => Err(UploadError::HashMismatch {
            declared: declared.to_string(),
            computed,
        }),
    }
}
