//! Provides a thread safe cache of [ByteViews](crate::byteview::ByteView).
//!
//! An [LRUCache](crate::lru::LRUCache) is not synchronized at all. As a group is accessed by many
//! tasks at once, every access to its local store is serialized by the mutex within [Cache].
//! Note that the lock is only ever held for the duration of a single lookup or insertion and
//! never across an **await**.
use parking_lot::Mutex;

use crate::byteview::ByteView;
use crate::lru::{EvictionHandler, LRUCache};

/// Wraps an [LRUCache](crate::lru::LRUCache) so that it can be shared between tasks.
///
/// # Examples
/// ```
/// # use peercache::lru::cache::Cache;
/// # use peercache::byteview::ByteView;
/// let cache = Cache::new(1024);
/// cache.add("Tom", ByteView::from("630"));
///
/// assert_eq!(cache.get("Tom").unwrap().to_string(), "630");
/// assert_eq!(cache.get("Jack").is_none(), true);
/// ```
pub struct Cache {
    lru: Mutex<LRUCache<ByteView>>,
}

impl Cache {
    /// Creates a new cache which occupies at most **max_memory** bytes (0 = unbounded).
    pub fn new(max_memory: usize) -> Self {
        Cache {
            lru: Mutex::new(LRUCache::new(max_memory)),
        }
    }

    /// Creates a new cache which reports each evicted entry to the given handler.
    ///
    /// Note that the handler is invoked while the internal lock is held. It must therefore not
    /// access the cache itself.
    pub fn with_eviction_handler(max_memory: usize, handler: EvictionHandler<ByteView>) -> Self {
        Cache {
            lru: Mutex::new(LRUCache::with_eviction_handler(max_memory, handler)),
        }
    }

    /// Stores the given value for the given key.
    pub fn add(&self, key: &str, value: ByteView) {
        self.lru.lock().put(key.to_owned(), value);
    }

    /// Returns a handle to the value stored for the given key.
    ///
    /// The returned view is immutable, therefore handing it out never permits to modify the
    /// cached value.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lru.lock().get(key).cloned()
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    /// Determines if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    /// Returns the amount of memory occupied by keys and values.
    pub fn allocated_memory(&self) -> usize {
        self.lru.lock().allocated_memory()
    }

    /// Returns the configured memory limit (0 = unbounded).
    pub fn max_memory(&self) -> usize {
        self.lru.lock().max_memory()
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::lru::cache::Cache;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn concurrent_access_keeps_the_budget() {
        let cache = Arc::new(Cache::new(256));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("{}-{}", worker, i % 50);
                        cache.add(&key, ByteView::from(key.as_str()));
                        let _ = cache.get(&format!("{}-{}", worker, i % 7));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(cache.allocated_memory() <= cache.max_memory());
        assert!(!cache.is_empty());
    }

    #[test]
    fn evictions_are_reported() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        let cache = Cache::with_eviction_handler(
            4,
            Box::new(move |_: &str, _: &ByteView| {
                let _ = counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        cache.add("a", ByteView::from("1"));
        cache.add("b", ByteView::from("2"));
        cache.add("c", ByteView::from("3"));

        assert_eq!(cache.len(), 2);
        assert_eq!(evictions.load(Ordering::Relaxed), 1);
        assert_eq!(cache.get("a"), None);
    }
}
