use std::{sync::Arc, time::Duration};

use metrics::counter;
use moka::sync::Cache;

use crate::model::{content_fingerprint, Ad, AdParseError};

/// Parsed-ad cache. Entries are keyed by remote-data key plus the SHA3
/// fingerprint of the stored bytes, so a re-download with new contents never
/// serves a stale ad.
#[derive(Debug, Clone)]
pub struct AdCache {
    ads: Cache<String, Arc<Ad>>,
}

impl AdCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_CAPACITY: u64 = 10_000;

    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            ads: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity)
                .build(),
        }
    }

    /// Returns the cached ad for `key`/`data`, parsing and caching it on a
    /// miss. Parse failures are not cached.
    pub fn get_or_parse(&self, key: &str, data: &[u8]) -> Result<Arc<Ad>, AdParseError> {
        let cache_key = format!("{key}:{}", content_fingerprint(data));
        if let Some(ad) = self.ads.get(&cache_key) {
            counter!("ad_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(ad);
        }
        counter!("ad_cache_lookups_total", "result" => "miss").increment(1);
        let ad = Arc::new(Ad::parse(key, data)?);
        self.ads.insert(cache_key, ad.clone());
        Ok(ad)
    }

    pub fn invalidate_all(&self) {
        self.ads.invalidate_all();
    }
}

impl Default for AdCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
