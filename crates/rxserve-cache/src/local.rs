//! In-process cache tier.
//!
//! A bounded LRU intended for static reference data. Entries live until
//! LRU eviction or their optional per-entry expiry; command invalidation
//! never touches this tier.

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct LocalEntry {
    payload: Bytes,
    inserted_at: Instant,
    expiry: Option<Duration>,
}

impl LocalEntry {
    fn is_expired(&self) -> bool {
        self.expiry
            .is_some_and(|expiry| self.inserted_at.elapsed() > expiry)
    }
}

/// Bounded LRU over immutable payload snapshots.
///
/// Reads may race with eviction; a racing reader simply sees a miss.
pub struct LocalTier {
    entries: Mutex<LruCache<String, LocalEntry>>,
}

impl LocalTier {
    pub fn new(max_items: usize) -> Self {
        let capacity = NonZeroUsize::new(max_items)
            .unwrap_or_else(|| NonZeroUsize::new(1024).expect("nonzero literal"));
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock().expect("local tier lock poisoned");
        let expired = matches!(entries.get(key), Some(entry) if entry.is_expired());
        if expired {
            entries.pop(key);
            counter!("cache_local_expired_total").increment(1);
            return None;
        }
        entries.get(key).map(|entry| entry.payload.clone())
    }

    pub fn insert(&self, key: String, payload: Bytes, expiry: Option<Duration>) {
        let mut entries = self.entries.lock().expect("local tier lock poisoned");
        let evicted = entries.push(
            key,
            LocalEntry {
                payload,
                inserted_at: Instant::now(),
                expiry,
            },
        );
        if evicted.is_some() {
            counter!("cache_local_evictions_total").increment(1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("local tier lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns_payloads() {
        let tier = LocalTier::new(4);
        tier.insert("dose-units".into(), Bytes::from_static(b"[\"mg\"]"), None);
        assert_eq!(tier.get("dose-units"), Some(Bytes::from_static(b"[\"mg\"]")));
        assert_eq!(tier.get("absent"), None);
    }

    #[test]
    fn lru_bound_evicts_the_oldest() {
        let tier = LocalTier::new(2);
        tier.insert("a".into(), Bytes::from_static(b"1"), None);
        tier.insert("b".into(), Bytes::from_static(b"2"), None);
        tier.get("a");
        tier.insert("c".into(), Bytes::from_static(b"3"), None);

        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn per_entry_expiry_turns_into_a_miss() {
        let tier = LocalTier::new(4);
        tier.insert(
            "short".into(),
            Bytes::from_static(b"x"),
            Some(Duration::from_millis(20)),
        );
        assert!(tier.get("short").is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(tier.get("short").is_none());
        assert!(tier.is_empty());
    }
}
