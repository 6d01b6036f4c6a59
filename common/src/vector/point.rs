use sha2::{Digest, Sha256};

/// Derives the numeric ANN point id from a string external id.
///
/// The first 8-byte slice of SHA-256(external id) is read as a big-endian
/// u64. The ANN store rejects point id zero, so a zero slice falls through
/// to the next slice (four slices total); if all four are zero, the maximum
/// representable value is used. The mapping is pure: identical external ids
/// always produce identical point ids, which is what makes re-processing an
/// upsert instead of a duplicate insert.
pub fn derive_point_id(external_id: &str) -> u64 {
    let digest = Sha256::digest(external_id.as_bytes());

    for slice in digest.chunks_exact(8).take(4) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(slice);
        let candidate = u64::from_be_bytes(bytes);
        if candidate != 0 {
            return candidate;
        }
    }

    u64::MAX
}
