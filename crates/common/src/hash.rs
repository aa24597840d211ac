use blake2::{digest::typenum::U32, Blake2b, Digest};

/// Blake2b-256 digest of `data`.
pub fn blake2(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encoded Blake2b-256 digest, used to identify source archives in logs.
pub fn archive_digest(data: &[u8]) -> String {
    hex::encode(blake2(data))
}
