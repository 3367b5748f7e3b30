use sha3::{Digest, Sha3_256};
use strum_macros::AsRefStr;
use xxhash_rust::xxh3::xxh3_128;

/// 128-bit hash applied to elements and fingerprints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum HashFunction {
    #[default]
    Xxh3_128,
    /// SHA3-256 truncated to its first 16 bytes.
    Sha3_256,
}

impl HashFunction {
    pub fn hash(&self, bytes: &[u8]) -> u128 {
        match self {
            HashFunction::Xxh3_128 => xxh3_128(bytes),
            HashFunction::Sha3_256 => {
                let digest = Sha3_256::digest(bytes);
                let mut head = [0_u8; 16];
                head.copy_from_slice(&digest[..16]);
                u128::from_le_bytes(head)
            }
        }
    }
}
