use sha2::{Digest, Sha256};

/// Length of an etag in hex characters.
pub const ETAG_LEN: usize = 32;

/// Content hash of an entity body: the first 16 bytes of SHA-256, lowercase hex.
///
/// Entities without a stored body hash the empty payload.
#[must_use]
pub fn etag_of(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    hex::encode(&digest[..ETAG_LEN / 2])
}
