use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe LRU cache of text embeddings.
///
/// Entries are keyed by a SHA-256 digest of `(model, text)`, so vectors from
/// different embedding models never mix and long paragraphs do not sit in
/// memory twice.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<[u8; 32], Vec<f32>>>,
}

impl EmbeddingCache {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn key(model: &str, text: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<[u8; 32], Vec<f32>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        self.lock().get(&Self::key(model, text)).cloned()
    }

    pub fn put(&self, model: &str, text: &str, embedding: Vec<f32>) {
        self.lock().put(Self::key(model, text), embedding);
    }

    /// Look up many texts at once; `None` marks a miss.
    pub fn get_many(&self, model: &str, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut cache = self.lock();
        texts
            .iter()
            .map(|t| cache.get(&Self::key(model, t)).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_get() {
        let cache = EmbeddingCache::new(10);
        cache.put("m", "test query", vec![1.0, 2.0, 3.0]);

        assert_eq!(cache.get("m", "test query"), Some(vec![1.0, 2.0, 3.0]));
        assert!(cache.get("m", "nonexistent").is_none());
    }

    #[test]
    fn test_models_do_not_share_entries() {
        let cache = EmbeddingCache::new(10);
        cache.put("small", "text", vec![1.0]);

        assert!(cache.get("large", "text").is_none());
    }

    #[test]
    fn test_cache_get_updates_lru() {
        let cache = EmbeddingCache::new(2);
        cache.put("m", "query1", vec![1.0]);
        cache.put("m", "query2", vec![2.0]);

        // Touch query1 so query2 becomes least recently used.
        let _ = cache.get("m", "query1");
        cache.put("m", "query3", vec![3.0]);

        assert!(cache.get("m", "query1").is_some());
        assert!(cache.get("m", "query2").is_none());
        assert!(cache.get("m", "query3").is_some());
    }

    #[test]
    fn test_get_many_marks_misses() {
        let cache = EmbeddingCache::new(10);
        cache.put("m", "a", vec![1.0]);

        let hits = cache.get_many("m", &["a".to_string(), "b".to_string()]);
        assert_eq!(hits, vec![Some(vec![1.0]), None]);
    }

    #[test]
    fn test_cache_capacity_zero_and_clear() {
        let cache = EmbeddingCache::new(0);
        cache.put("m", "query1", vec![1.0]);
        cache.put("m", "query2", vec![2.0]);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
