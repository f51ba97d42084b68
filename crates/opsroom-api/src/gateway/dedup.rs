//! Per-connection duplicate suppression.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Bounded set of recently delivered message ids.
///
/// Eviction is first-in first-out: lookups never refresh an entry, so once
/// full the oldest delivered id is forgotten first.
pub struct DedupCache {
    seen: LruCache<String, ()>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Record `message_id`; `false` if it was already seen.
    pub fn insert_new(&mut self, message_id: &str) -> bool {
        if self.seen.contains(message_id) {
            return false;
        }
        self.seen.push(message_id.to_string(), ());
        true
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.seen.contains(message_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.seen.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_rejected() {
        let mut cache = DedupCache::new(10);
        assert!(cache.insert_new("a"));
        assert!(!cache.insert_new("a"));
        assert!(cache.insert_new("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_bounded_fifo_eviction() {
        let mut cache = DedupCache::new(1000);
        for i in 0..1500 {
            assert!(cache.insert_new(&format!("msg-{}", i)));
        }
        assert_eq!(cache.len(), 1000);
        for i in 0..500 {
            assert!(!cache.contains(&format!("msg-{}", i)));
        }
        for i in 500..1500 {
            assert!(cache.contains(&format!("msg-{}", i)));
        }
    }

    #[test]
    fn test_repeat_lookup_does_not_refresh() {
        let mut cache = DedupCache::new(2);
        cache.insert_new("a");
        cache.insert_new("b");
        // seen again, but still the oldest
        assert!(!cache.insert_new("a"));
        cache.insert_new("c");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = DedupCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(cache.is_empty());
    }
}
