//! Process-wide cache of single-value metadata responses.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// Path → last successfully fetched value.
///
/// Entries are written only after a successful fetch and never expire. The
/// check-then-fetch-then-store sequence in the client is not atomic: two
/// concurrent first fetches of one path may both hit the network, and the
/// last writer wins. Values are stable for the life of an instance, so
/// either write is correct.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<String, String>,
}

impl MetadataCache {
    /// Create an empty cache, separate from the global one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every client built from the default config.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<MetadataCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MetadataCache::new())))
    }

    /// Cached value for `path`.
    pub fn get(&self, path: &str) -> Option<String> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    /// Store `value` for `path`, replacing any earlier value.
    pub fn insert(&self, path: &str, value: String) {
        self.entries.insert(path.to_string(), value);
    }

    /// Whether `path` has a cached value.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of cached paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let cache = MetadataCache::new();
        cache.insert("/latest/meta-data/instance-id", "i-1".to_string());
        cache.insert("/latest/meta-data/instance-id", "i-2".to_string());

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("/latest/meta-data/instance-id").as_deref(),
            Some("i-2")
        );
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let cache = MetadataCache::new();
        cache.insert("/a/B", "x".to_string());
        assert!(cache.contains("/a/B"));
        assert!(!cache.contains("/a/b"));
    }

    #[test]
    fn test_clear_empties_everything() {
        let cache = MetadataCache::new();
        cache.insert("/a", "1".to_string());
        cache.insert("/b", "2".to_string());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("/a"), None);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&MetadataCache::global(), &MetadataCache::global()));
    }
}
