use strum_macros::AsRefStr;

use super::HashFunction;

/// Maps element hashes to bucket indices and fingerprints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    /// Modular bucket addressing, so the bucket count need not be a power of
    /// two.
    #[default]
    SimpleMod,
}

impl Strategy {
    pub fn bucket_index(&self, hash: u128, bucket_count: u32) -> u32 {
        match self {
            Strategy::SimpleMod => ((hash as u64) % u64::from(bucket_count)) as u32,
        }
    }

    /// Derives a non-zero fingerprint of `length` bits; zero marks an empty
    /// slot.
    pub fn fingerprint(&self, hash: u128, length: u8) -> u64 {
        match self {
            Strategy::SimpleMod => {
                let high = (hash >> 64) as u64;
                let modulus = max_fingerprint(length);
                (high % modulus) + 1
            }
        }
    }

    /// Returns the alternate bucket for `fingerprint` stored at `bucket`.
    /// Applying it twice yields the original bucket.
    pub fn other_bucket_index(
        &self,
        fingerprint: u64,
        bucket: u32,
        bucket_count: u32,
        hash_function: HashFunction,
    ) -> u32 {
        match self {
            Strategy::SimpleMod => {
                let count = u64::from(bucket_count);
                let offset = (hash_function.hash(&fingerprint.to_le_bytes()) as u64) % count;
                ((offset + count - u64::from(bucket)) % count) as u32
            }
        }
    }
}

/// Largest fingerprint value for `length` bits (`2^length - 1`).
pub(crate) fn max_fingerprint(length: u8) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1_u64 << length) - 1
    }
}
