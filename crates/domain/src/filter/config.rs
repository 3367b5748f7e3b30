use super::{FilterError, HashFunction, Strategy};

/// Slots per bucket used by [`Size::compute_efficient_size`].
pub const DEFAULT_BUCKET_CAPACITY: u8 = 4;

/// Occupancy targeted when sizing; four-slot tables start failing inserts
/// around 95%.
const TARGET_LOAD_FACTOR: f64 = 0.9;

pub const MAX_BUCKET_CAPACITY: u8 = 128;
pub const MAX_FINGERPRINT_LENGTH: u8 = 64;

/// Table geometry of a cuckoo filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    bucket_count: u32,
    bucket_capacity: u8,
    fingerprint_length: u8,
}

impl Size {
    pub fn new(
        bucket_count: u32,
        bucket_capacity: u8,
        fingerprint_length: u8,
    ) -> Result<Self, FilterError> {
        if bucket_count == 0 {
            return Err(FilterError::InvalidSize("bucket count must be positive".into()));
        }
        if bucket_capacity == 0 || bucket_capacity > MAX_BUCKET_CAPACITY {
            return Err(FilterError::InvalidSize(format!(
                "bucket capacity must be in [1, {MAX_BUCKET_CAPACITY}], got {bucket_capacity}"
            )));
        }
        if fingerprint_length == 0 || fingerprint_length > MAX_FINGERPRINT_LENGTH {
            return Err(FilterError::InvalidSize(format!(
                "fingerprint length must be in [1, {MAX_FINGERPRINT_LENGTH}], got {fingerprint_length}"
            )));
        }
        Ok(Self {
            bucket_count,
            bucket_capacity,
            fingerprint_length,
        })
    }

    /// Picks the smallest table that holds `count_upper_bound` elements while
    /// keeping the false positive rate under `target_fp_rate`.
    ///
    /// A lookup compares against at most `2 * capacity` fingerprints, each
    /// colliding with probability `1 / 2^f`, so `f = ceil(log2(2b / rate))`.
    pub fn compute_efficient_size(
        target_fp_rate: f64,
        count_upper_bound: u64,
    ) -> Result<Self, FilterError> {
        if !(target_fp_rate > 0.0 && target_fp_rate < 1.0) {
            return Err(FilterError::InvalidFalsePositiveRate(target_fp_rate));
        }
        if count_upper_bound == 0 {
            return Err(FilterError::InvalidCount);
        }

        let capacity = DEFAULT_BUCKET_CAPACITY;
        let bits = (2.0 * f64::from(capacity) / target_fp_rate).log2().ceil();
        let fingerprint_length = bits.clamp(1.0, f64::from(MAX_FINGERPRINT_LENGTH)) as u8;

        let buckets = (count_upper_bound as f64 / (f64::from(capacity) * TARGET_LOAD_FACTOR)).ceil();
        if buckets > f64::from(u32::MAX) {
            return Err(FilterError::InvalidSize(format!(
                "{count_upper_bound} elements exceed the addressable bucket count"
            )));
        }

        Self::new((buckets as u32).max(1), capacity, fingerprint_length)
    }

    /// Same geometry with at least `extra` more buckets.
    pub fn grown(&self, extra: u32) -> Result<Self, FilterError> {
        let bucket_count = self.bucket_count.checked_add(extra.max(1)).ok_or_else(|| {
            FilterError::InvalidSize("bucket count overflow".into())
        })?;
        Self::new(bucket_count, self.bucket_capacity, self.fingerprint_length)
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn bucket_capacity(&self) -> u8 {
        self.bucket_capacity
    }

    pub fn fingerprint_length(&self) -> u8 {
        self.fingerprint_length
    }

    pub fn slot_count(&self) -> usize {
        self.bucket_count as usize * self.bucket_capacity as usize
    }
}

/// Full description of how a filter hashes and lays out its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuckooFilterConfig {
    size: Size,
    hash_function: HashFunction,
    strategy: Strategy,
}

impl CuckooFilterConfig {
    pub fn builder() -> CuckooFilterConfigBuilder {
        CuckooFilterConfigBuilder::default()
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

#[derive(Debug, Default)]
pub struct CuckooFilterConfigBuilder {
    size: Option<Size>,
    hash_function: HashFunction,
    strategy: Strategy,
}

impl CuckooFilterConfigBuilder {
    pub fn size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn hash_function(mut self, hash_function: HashFunction) -> Self {
        self.hash_function = hash_function;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn build(self) -> Result<CuckooFilterConfig, FilterError> {
        let size = self
            .size
            .ok_or_else(|| FilterError::InvalidSize("size is required".into()))?;
        Ok(CuckooFilterConfig {
            size,
            hash_function: self.hash_function,
            strategy: self.strategy,
        })
    }
}
