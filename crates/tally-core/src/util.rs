use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest linking a receipt to its predecessor: `SHA-256(prev_hex? || payload || signature)`.
///
/// `prev` is fed as the UTF-8 bytes of its hex text, not the decoded digest. The genesis
/// receipt has no prefix at all.
pub fn chain_hash(prev: Option<&str>, payload: &[u8], signature: &[u8]) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload);
    hasher.update(signature);
    hex::encode(hasher.finalize())
}
