//! Short-TTL response cache keyed by normalized message text and language.

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::language::Language;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

pub struct ResponseCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    max_size: usize,
    ttl: Duration,
}

/// Case and whitespace folding applied before hashing.
pub fn normalize(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cache_key(query: &str, language: Language) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(query).as_bytes());
    hasher.update(b":");
    hasher.update(language.code().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, Duration::from_secs(config.ttl_seconds))
    }

    pub fn get(&self, query: &str, language: Language) -> Option<V> {
        let key = cache_key(query, language);
        let mut entries = self.entries.lock();

        let expired = match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                tracing::info!(language = %language, "Cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(&key);
            tracing::debug!("Cache entry expired and removed");
        }
        tracing::debug!(language = %language, "Cache miss");
        None
    }

    pub fn put(&self, query: &str, language: Language, value: V) {
        let key = cache_key(query, language);
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            let remove_count = (self.max_size / 5).max(1);
            let mut by_age: Vec<(String, Instant)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.stored_at))
                .collect();
            by_age.sort_by_key(|(_, stored_at)| *stored_at);
            for (k, _) in by_age.into_iter().take(remove_count) {
                entries.remove(&k);
            }
            tracing::info!(removed = remove_count, "Cache full, evicted oldest entries");
        }

        entries.insert(key, CacheEntry { value, stored_at: Instant::now() });
        tracing::debug!(size = entries.len(), "Cache stored response");
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        tracing::info!("Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.lock().len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_folds_case_and_whitespace() {
        assert_eq!(
            cache_key("  Show   VILLAS in Madinaty ", Language::En),
            cache_key("show villas in madinaty", Language::En)
        );
        assert_ne!(
            cache_key("show villas", Language::En),
            cache_key("show villas", Language::Franco)
        );
        assert_eq!(cache_key("x", Language::Ar).len(), 64);
    }

    #[test]
    fn test_hit_and_miss() {
        let cache: ResponseCache<String> = ResponseCache::new(10, Duration::from_secs(60));
        assert!(cache.get("hello", Language::En).is_none());
        cache.put("hello", Language::En, "hi there".to_string());
        assert_eq!(cache.get("HELLO", Language::En).as_deref(), Some("hi there"));
        assert!(cache.get("hello", Language::Ar).is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache: ResponseCache<u32> = ResponseCache::new(10, Duration::ZERO);
        cache.put("q", Language::En, 1);
        assert!(cache.get("q", Language::En).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_eviction_removes_oldest_fifth() {
        let cache: ResponseCache<usize> = ResponseCache::new(10, Duration::from_secs(60));
        for i in 0..10 {
            cache.put(&format!("query {}", i), Language::En, i);
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.put("query 10", Language::En, 10);
        assert_eq!(cache.stats().size, 9);
        assert!(cache.get("query 0", Language::En).is_none());
        assert!(cache.get("query 1", Language::En).is_none());
        assert_eq!(cache.get("query 2", Language::En), Some(2));
        assert_eq!(cache.get("query 10", Language::En), Some(10));
    }

    #[test]
    fn test_clear_and_stats() {
        let cache: ResponseCache<u8> = ResponseCache::from_config(&CacheConfig::default());
        cache.put("a", Language::En, 1);
        assert_eq!(cache.stats(), CacheStats { size: 1, max_size: 1000, ttl_seconds: 3600 });
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
