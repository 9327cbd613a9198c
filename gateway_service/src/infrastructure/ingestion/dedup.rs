use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Set de deduplicación en memoria con TTL corto.
///
/// Suprime los duplicados que producen el WebSocket y el poller al
/// observar el mismo hash, sin tocar storage. Es local al proceso y
/// acotado: el índice único en base de datos es la garantía final.
pub struct DedupCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl DedupCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Registra el hash; `true` si no se había visto dentro del TTL.
    pub fn insert(&self, tx_hash: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        let now = Instant::now();

        if seen.len() >= self.max_entries {
            seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        }
        // Still over capacity after purging: drop the set rather than
        // grow without bound; the DB constraint absorbs re-inserts.
        if seen.len() >= self.max_entries {
            seen.clear();
        }

        match seen.get(tx_hash) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                seen.insert(tx_hash.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_within_ttl_suppressed() {
        let cache = DedupCache::new(Duration::from_secs(60), 1024);
        assert!(cache.insert("5VfYt1"));
        assert!(!cache.insert("5VfYt1"));
        assert!(cache.insert("other"));
    }

    #[test]
    fn test_expired_entry_reaccepted() {
        let cache = DedupCache::new(Duration::ZERO, 1024);
        assert!(cache.insert("5VfYt1"));
        // TTL zero: immediately stale
        assert!(cache.insert("5VfYt1"));
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = DedupCache::new(Duration::from_secs(600), 4);
        for i in 0..100 {
            cache.insert(&format!("hash-{}", i));
        }
        let seen = cache.seen.lock().unwrap();
        assert!(seen.len() <= 4);
    }
}
