//! Cuckoo filter used to ship ad targeting lists without exposing their
//! contents. Lookups never return false negatives; false positives are
//! bounded by the fingerprint length chosen in [`Size`].

mod config;
mod hash;
mod strategy;
mod table;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

pub use config::{CuckooFilterConfig, CuckooFilterConfigBuilder, Size, DEFAULT_BUCKET_CAPACITY};
pub use hash::HashFunction;
pub use strategy::Strategy;
pub use table::SerializedCuckooFilterTable;

/// Relocations attempted before an insert is declared failed.
pub const MAX_REPLACEMENTS: usize = 500;

const KICK_SEED: u64 = 0x6f64_7066_696c_7472;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("false positive rate must be in (0,1): {0}")]
    InvalidFalsePositiveRate(f64),
    #[error("element count upper bound must be greater than zero")]
    InvalidCount,
    #[error("invalid filter size: {0}")]
    InvalidSize(String),
    #[error("malformed serialized table: {0}")]
    MalformedTable(String),
    #[error("invalid base64 filter: {0}")]
    Base64(String),
}

#[derive(Debug, Clone)]
pub struct CuckooFilter {
    config: CuckooFilterConfig,
    slots: Vec<u64>,
    count: u64,
    rng: StdRng,
}

impl CuckooFilter {
    pub fn new(config: CuckooFilterConfig) -> Self {
        Self {
            slots: vec![0; config.size().slot_count()],
            config,
            count: 0,
            rng: StdRng::seed_from_u64(KICK_SEED),
        }
    }

    /// Rebuilds a filter from a serialized table. The hash function and
    /// strategy are not part of the table and must match the ones used when
    /// the table was built.
    pub fn from_serialized_table(
        table: &SerializedCuckooFilterTable,
        hash_function: HashFunction,
        strategy: Strategy,
    ) -> Result<Self, FilterError> {
        let (size, slots) = table.decode()?;
        let config = CuckooFilterConfig::builder()
            .size(size)
            .hash_function(hash_function)
            .strategy(strategy)
            .build()?;
        let count = slots.iter().filter(|fp| **fp != 0).count() as u64;
        Ok(Self {
            config,
            slots,
            count,
            rng: StdRng::seed_from_u64(KICK_SEED),
        })
    }

    pub fn config(&self) -> &CuckooFilterConfig {
        &self.config
    }

    pub fn size(&self) -> Size {
        self.config.size()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn load_factor(&self) -> f64 {
        self.count as f64 / self.slots.len() as f64
    }

    /// Inserts `element`, returning `false` when the table is too full. A
    /// failed insert leaves the filter exactly as it was.
    pub fn insert(&mut self, element: &str) -> bool {
        let (fingerprint, primary) = self.locate(element);
        if self.place(primary, fingerprint) {
            return true;
        }
        let alternate = self.other_bucket(fingerprint, primary);
        if self.place(alternate, fingerprint) {
            return true;
        }

        let capacity = usize::from(self.size().bucket_capacity());
        let mut bucket = if self.rng.gen::<bool>() { primary } else { alternate };
        let mut carried = fingerprint;
        let mut swaps: Vec<(usize, u64)> = Vec::new();

        for _ in 0..MAX_REPLACEMENTS {
            let slot = bucket as usize * capacity + self.rng.gen_range(0..capacity);
            let evicted = self.slots[slot];
            swaps.push((slot, evicted));
            self.slots[slot] = carried;
            carried = evicted;
            bucket = self.other_bucket(carried, bucket);
            if self.place(bucket, carried) {
                return true;
            }
        }

        for (slot, previous) in swaps.into_iter().rev() {
            self.slots[slot] = previous;
        }
        false
    }

    pub fn contains(&self, element: &str) -> bool {
        let (fingerprint, primary) = self.locate(element);
        if self.find(primary, fingerprint).is_some() {
            return true;
        }
        let alternate = self.other_bucket(fingerprint, primary);
        self.find(alternate, fingerprint).is_some()
    }

    /// Removes one stored copy of `element`. Deleting something that was
    /// never inserted may remove a colliding element.
    pub fn delete(&mut self, element: &str) -> bool {
        let (fingerprint, primary) = self.locate(element);
        let alternate = self.other_bucket(fingerprint, primary);
        for bucket in [primary, alternate] {
            if let Some(slot) = self.find(bucket, fingerprint) {
                self.slots[slot] = 0;
                self.count -= 1;
                return true;
            }
        }
        false
    }

    pub fn serialize_table(&self) -> SerializedCuckooFilterTable {
        SerializedCuckooFilterTable::encode(self.size(), &self.slots)
    }

    fn locate(&self, element: &str) -> (u64, u32) {
        let size = self.size();
        let hash = self.config.hash_function().hash(element.as_bytes());
        let strategy = self.config.strategy();
        (
            strategy.fingerprint(hash, size.fingerprint_length()),
            strategy.bucket_index(hash, size.bucket_count()),
        )
    }

    fn other_bucket(&self, fingerprint: u64, bucket: u32) -> u32 {
        self.config.strategy().other_bucket_index(
            fingerprint,
            bucket,
            self.size().bucket_count(),
            self.config.hash_function(),
        )
    }

    fn bucket_slots(&self, bucket: u32) -> std::ops::Range<usize> {
        let capacity = usize::from(self.size().bucket_capacity());
        let start = bucket as usize * capacity;
        start..start + capacity
    }

    fn place(&mut self, bucket: u32, fingerprint: u64) -> bool {
        for slot in self.bucket_slots(bucket) {
            if self.slots[slot] == 0 {
                self.slots[slot] = fingerprint;
                self.count += 1;
                return true;
            }
        }
        false
    }

    fn find(&self, bucket: u32, fingerprint: u64) -> Option<usize> {
        self.bucket_slots(bucket)
            .find(|slot| self.slots[*slot] == fingerprint)
    }
}

/// Attempts made by [`build_encoded_filter`] before giving up on a list.
const MAX_BUILD_ATTEMPTS: usize = 8;

/// Builds a filter sized for `values` and returns its base64 table. When the
/// computed table cannot hold every value it is grown and rebuilt.
pub fn build_encoded_filter<S: AsRef<str>>(
    values: &[S],
    target_fp_rate: f64,
) -> Result<String, FilterError> {
    let mut size = Size::compute_efficient_size(target_fp_rate, values.len().max(1) as u64)?;
    for _ in 0..MAX_BUILD_ATTEMPTS {
        let config = CuckooFilterConfig::builder().size(size).build()?;
        let mut filter = CuckooFilter::new(config);
        if values.iter().all(|value| filter.insert(value.as_ref())) {
            return Ok(encode_filter(&filter));
        }
        size = size.grown(size.bucket_count() / 4)?;
    }
    Err(FilterError::InvalidSize(format!(
        "could not fit {} elements after {MAX_BUILD_ATTEMPTS} attempts",
        values.len()
    )))
}

pub fn encode_filter(filter: &CuckooFilter) -> String {
    STANDARD.encode(filter.serialize_table().as_bytes())
}

/// Decodes a base64 table produced by [`encode_filter`] using the default
/// hash function and strategy.
pub fn decode_filter(encoded: &str) -> Result<CuckooFilter, FilterError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| FilterError::Base64(err.to_string()))?;
    let table = SerializedCuckooFilterTable::from_bytes(bytes)?;
    CuckooFilter::from_serialized_table(&table, HashFunction::default(), Strategy::default())
}
