use crate::descriptor::RequestDescriptor;
use crate::error::BoxError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cached response data.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Value,
    /// Stale entries are still served to the stale-while-revalidate hook,
    /// but the request goes to the network anyway.
    pub is_stale: bool,
}

/// Pluggable response cache.
///
/// Consulted only for GET/HEAD requests that carry a cache id. Entries are
/// keyed by `(cache_id, request_id)`, where `request_id` is the request
/// fingerprint. Failures are never fatal to the request: lookup errors count
/// as a miss and write errors are logged and dropped.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Look up cached data for a request
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    async fn get_cached_data(
        &self,
        cache_id: &str,
        request_id: &str,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<CacheEntry>, BoxError>;

    /// Store fresh data for a request. Returns whether the data was stored.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    async fn cache_data(
        &self,
        cache_id: &str,
        request_id: &str,
        data: &Value,
        descriptor: &RequestDescriptor,
    ) -> Result<bool, BoxError>;
}

/// In-memory cache whose entries turn stale after a fixed age.
///
/// Stale entries are kept (and reported as stale) until overwritten or
/// invalidated.
#[derive(Debug)]
pub struct MemoryCache {
    max_age: Duration,
    entries: Mutex<HashMap<(String, String), (Value, Instant)>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every entry stored under `cache_id`
    pub fn invalidate(&self, cache_id: &str) {
        self.entries.lock().retain(|(id, _), _| id != cache_id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get_cached_data(
        &self,
        cache_id: &str,
        request_id: &str,
        _descriptor: &RequestDescriptor,
    ) -> Result<Option<CacheEntry>, BoxError> {
        let entries = self.entries.lock();
        let entry = entries
            .get(&(cache_id.to_owned(), request_id.to_owned()))
            .map(|(data, stored_at)| CacheEntry {
                data: data.clone(),
                is_stale: stored_at.elapsed() >= self.max_age,
            });
        Ok(entry)
    }

    async fn cache_data(
        &self,
        cache_id: &str,
        request_id: &str,
        data: &Value,
        _descriptor: &RequestDescriptor,
    ) -> Result<bool, BoxError> {
        self.entries.lock().insert(
            (cache_id.to_owned(), request_id.to_owned()),
            (data.clone(), Instant::now()),
        );
        Ok(true)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let descriptor = RequestDescriptor::new();

        assert!(
            cache
                .get_cached_data("orders", "abc", &descriptor)
                .await
                .unwrap()
                .is_none()
        );

        assert!(
            cache
                .cache_data("orders", "abc", &json!([1]), &descriptor)
                .await
                .unwrap()
        );

        let entry = cache
            .get_cached_data("orders", "abc", &descriptor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.data, json!([1]));
        assert!(!entry.is_stale);
    }

    #[tokio::test]
    async fn test_zero_max_age_is_always_stale() {
        let cache = MemoryCache::new(Duration::ZERO);
        let descriptor = RequestDescriptor::new();
        cache
            .cache_data("orders", "abc", &json!([1]), &descriptor)
            .await
            .unwrap();

        let entry = cache
            .get_cached_data("orders", "abc", &descriptor)
            .await
            .unwrap()
            .unwrap();
        assert!(entry.is_stale);
    }

    #[tokio::test]
    async fn test_invalidate_by_cache_id() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let descriptor = RequestDescriptor::new();
        cache.cache_data("orders", "1", &json!(1), &descriptor).await.unwrap();
        cache.cache_data("users", "1", &json!(2), &descriptor).await.unwrap();

        cache.invalidate("orders");
        assert_eq!(cache.len(), 1);
        assert!(
            cache
                .get_cached_data("users", "1", &descriptor)
                .await
                .unwrap()
                .is_some()
        );
    }
}
