//! Deterministic bucketing: maps a (user, experiment) identity to a numeric
//! slot. The mapping depends only on its inputs, never on call history or
//! process identity, so the same user lands in the same slot across
//! restarts and re-implementations sharing the hash.
//!
//! Two independently salted hashes are derived per pair: the traffic bucket
//! decides inclusion, the variant bucket decides the arm. Separate salts
//! keep the two decisions uncorrelated across experiments sharing a user.

use sha2::{Digest, Sha256};

const TRAFFIC_SALT: &str = "traffic";
const VARIANT_SALT: &str = "variant";

/// Hash an arbitrary key to a non-negative 64-bit slot (first eight bytes
/// of the SHA-256 digest, big-endian).
pub fn bucket_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Traffic bucket in `0..100` for the inclusion decision.
pub fn traffic_bucket(user_id: &str, experiment_id: &str) -> u8 {
    (bucket_hash(&bucket_key(user_id, experiment_id, TRAFFIC_SALT)) % 100) as u8
}

/// Variant bucket in `0..total_weight` for the arm decision.
/// `total_weight` must be positive; a zero weight yields bucket 0.
pub fn variant_bucket(user_id: &str, experiment_id: &str, total_weight: u64) -> u64 {
    if total_weight == 0 {
        return 0;
    }
    bucket_hash(&bucket_key(user_id, experiment_id, VARIANT_SALT)) % total_weight
}

fn bucket_key(user_id: &str, experiment_id: &str, salt: &str) -> String {
    format!("{user_id}:{experiment_id}:{salt}")
}
