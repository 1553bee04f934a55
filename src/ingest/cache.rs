use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Process-wide record of article links recently handed to a worker.
///
/// Concurrent feed workers that see the same link (syndicated stories,
/// aggregator feeds) race through the store check at the same time. Claiming
/// links here first means only one of them enriches and inserts a given link.
/// The store's `UNIQUE(link)` constraint still has the final word.
#[derive(Debug)]
pub struct LinkCache {
    inner: Mutex<LruCache<String, ()>>,
}

impl LinkCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Marks every link not already present and returns those, in input order.
    ///
    /// The whole batch is checked and marked under one lock, so two callers
    /// can never both receive the same link.
    pub fn claim(&self, links: Vec<String>) -> Vec<String> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        links
            .into_iter()
            .filter(|link| {
                if cache.contains(link) {
                    cache.promote(link);
                    false
                } else {
                    cache.put(link.clone(), ());
                    true
                }
            })
            .collect()
    }

    /// Forgets links whose insert failed so a later pass can retry them.
    pub fn release(&self, links: &[String]) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for link in links {
            cache.pop(link);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn links(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_claim_returns_only_new_links() {
        let cache = LinkCache::new(10);
        assert_eq!(cache.claim(links(&["a", "b"])), links(&["a", "b"]));
        assert_eq!(cache.claim(links(&["b", "c"])), links(&["c"]));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_duplicates_within_one_claim() {
        let cache = LinkCache::new(10);
        assert_eq!(cache.claim(links(&["a", "a", "b"])), links(&["a", "b"]));
    }

    #[test]
    fn test_release_allows_reclaim() {
        let cache = LinkCache::new(10);
        cache.claim(links(&["a", "b"]));
        cache.release(&links(&["a"]));
        assert_eq!(cache.claim(links(&["a", "b"])), links(&["a"]));
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = LinkCache::new(2);
        cache.claim(links(&["a", "b"]));
        cache.claim(links(&["c"]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.claim(links(&["a"])), links(&["a"]));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = LinkCache::new(0);
        assert_eq!(cache.claim(links(&["a"])), links(&["a"]));
    }

    #[test]
    fn test_concurrent_claims_never_overlap() {
        let cache = Arc::new(LinkCache::new(10_000));
        let batch: Vec<String> = (0..500).map(|i| format!("https://x.example.com/{}", i)).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let batch = batch.clone();
                std::thread::spawn(move || cache.claim(batch))
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert_eq!(total, 500);
    }
}
