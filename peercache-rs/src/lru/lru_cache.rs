use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of memory in bytes which is accounted for this value.
    ///
    /// For byte buffers and strings this is simply their length, as this is what is charged
    /// against the memory budget of a cache.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<u8> {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Invoked for each entry which is evicted by [LRUCache::remove_oldest].
pub type EvictionHandler<V> = Box<dyn FnMut(&str, &V) + Send>;

/// Provides a memory constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as the allocated memory is below the given limit.
/// Once an insertion pushes it above **max_memory**, old (least recently used) entries are
/// evicted until the cache fits again - hence the name LRU cache.
///
/// Each entry is charged with the length of its key plus the
/// [allocated_size](ByteSize::allocated_size) of its value. A **max_memory** of 0 disables the
/// limit altogether, so that the cache grows without bounds.
///
/// Note that this cache is not synchronized. Use [Cache](crate::lru::cache::Cache) to share it
/// between tasks.
///
/// # Examples
/// ```
/// # use peercache::lru::LRUCache;
/// // Specifies a cache which can store up to 16 bytes of keys and values...
/// let mut lru = LRUCache::new(16);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit (6 + 8 bytes)..
/// lru.put("Foo1".to_owned(), "Blub".to_owned());
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo1").is_some(), true);
///
/// // this will hit the max memory constraint...
/// lru.put("Foo2".to_owned(), "X".repeat(8));
/// // ..and therefore will throw the two others out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    on_evicted: Option<EvictionHandler<V>>,
    map: LinkedHashMap<String, V>,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which stores entries until they occupy **max_memory** bytes.
    ///
    /// Passing 0 creates an unbounded cache.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            on_evicted: None,
            map: LinkedHashMap::new(),
        }
    }

    /// Creates a new cache which invokes the given handler for each evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    /// let mut lru = LRUCache::with_eviction_handler(
    ///     7,
    ///     Box::new(move |key: &str, _: &String| log.lock().unwrap().push(key.to_owned())),
    /// );
    ///
    /// lru.put("a".to_owned(), "123".to_owned());
    /// lru.put("b".to_owned(), "456".to_owned());
    ///
    /// assert_eq!(evicted.lock().unwrap().as_slice(), &["a".to_owned()]);
    /// ```
    pub fn with_eviction_handler(max_memory: usize, on_evicted: EvictionHandler<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(on_evicted);

        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry becomes the most
    /// recently used one. Afterwards, least recently used entries are evicted until the cache
    /// fits into **max_memory** again. Note that this might even evict the entry which has just
    /// been stored, if it alone is larger than the whole cache.
    pub fn put(&mut self, key: String, value: V) {
        let key_size = key.len();
        let value_size = value.allocated_size();

        match self.map.insert(key, value) {
            Some(previous) => {
                self.allocated_memory =
                    self.allocated_memory - previous.allocated_size() + value_size;
            }
            None => self.allocated_memory += key_size + value_size,
        }

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory > 0 && self.allocated_memory > self.max_memory {
            if !self.remove_oldest() {
                unreachable!("Failed to enforce constraints of a LRU cache!");
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as the most recently used one.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // After inserting a value...
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// // ..it can be retrieved.
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
    /// assert_eq!(lru.get("Unknown"), None);
    ///```
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.map.get_refresh(key).map(|v| &*v)
    }

    /// Evicts the least recently used entry.
    ///
    /// The eviction handler (if present) is notified about the removed entry. Returns **false**
    /// if the cache was already empty.
    pub fn remove_oldest(&mut self) -> bool {
        match self.map.pop_front() {
            Some((key, value)) => {
                self.allocated_memory -= key.len() + value.allocated_size();
                if let Some(handler) = self.on_evicted.as_mut() {
                    handler(&key, &value);
                }

                true
            }
            None => false,
        }
    }

    /// Returns the number of elements in the cache.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// assert_eq!(lru.len(), 0);
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be occupied by this cache (0 = unbounded).
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the amount of memory allocated to store the keys and values of this cache.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::{ByteSize, LRUCache};
    use std::sync::{Arc, Mutex};

    /// Recomputes the memory usage from scratch so that it can be compared to the book keeping
    /// of the cache.
    fn expected_memory(lru: &LRUCache<String>) -> usize {
        lru.map
            .iter()
            .map(|(key, value)| key.len() + value.allocated_size())
            .sum()
    }

    #[test]
    fn unbounded_cache_never_evicts() {
        let mut lru = LRUCache::new(0);
        for i in 0..1000 {
            lru.put(format!("key{}", i), format!("value{}", i));
        }

        assert_eq!(lru.len(), 1000);
        assert_eq!(lru.get("key0").unwrap(), "value0");
    }

    #[test]
    fn max_memory_is_enforced() {
        let mut lru = LRUCache::new(20);

        lru.put("a".to_owned(), "1".to_owned());
        lru.put("bb".to_owned(), "22".to_owned());
        lru.put("ccc".to_owned(), "333".to_owned());
        lru.put("dddd".to_owned(), "4444".to_owned());
        assert_eq!(lru.allocated_memory(), 20);
        assert_eq!(lru.len(), 4);

        // One more entry exceeds the budget, therefore the entry which hasn't been touched for
        // the longest time is evicted...
        lru.put("e".to_owned(), "5".to_owned());
        assert_eq!(lru.allocated_memory(), 20);
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("bb").unwrap(), "22");
    }

    #[test]
    fn recently_used_entries_survive() {
        let mut lru = LRUCache::new(6);
        lru.put("a".to_owned(), "1".to_owned());
        lru.put("b".to_owned(), "2".to_owned());
        lru.put("c".to_owned(), "3".to_owned());

        // Touching "a" makes "b" the least recently used entry...
        let _ = lru.get("a");
        lru.put("d".to_owned(), "4".to_owned());

        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.get("a").unwrap(), "1");
        assert_eq!(lru.get("c").unwrap(), "3");
        assert_eq!(lru.get("d").unwrap(), "4");
    }

    #[test]
    fn updates_are_accounted_by_their_delta() {
        let mut lru = LRUCache::new(0);
        lru.put("key".to_owned(), "value".to_owned());
        assert_eq!(lru.allocated_memory(), 8);

        lru.put("key".to_owned(), "v".to_owned());
        assert_eq!(lru.allocated_memory(), 4);
        assert_eq!(lru.len(), 1);

        lru.put("key".to_owned(), "a longer value".to_owned());
        assert_eq!(lru.allocated_memory(), 3 + 14);
    }

    #[test]
    fn growing_an_entry_evicts_older_ones_but_not_itself() {
        let mut lru = LRUCache::new(12);
        lru.put("a".to_owned(), "11".to_owned());
        lru.put("b".to_owned(), "22".to_owned());
        lru.put("c".to_owned(), "33".to_owned());
        assert_eq!(lru.allocated_memory(), 9);

        // Growing "c" to 9 bytes requires to drop both, "a" and "b"...
        lru.put("c".to_owned(), "333333333".to_owned());
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.allocated_memory(), 10);
        assert_eq!(lru.get("c").unwrap(), "333333333");
    }

    #[test]
    fn oversized_entries_are_evicted_immediately() {
        let mut lru = LRUCache::new(4);
        lru.put("a".to_owned(), "1".to_owned());
        lru.put("huge".to_owned(), "value".to_owned());

        assert_eq!(lru.len(), 0);
        assert_eq!(lru.allocated_memory(), 0);
    }

    #[test]
    fn remove_oldest_notifies_the_handler() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();
        let mut lru = LRUCache::with_eviction_handler(
            0,
            Box::new(move |key: &str, value: &String| {
                log.lock().unwrap().push(format!("{}={}", key, value))
            }),
        );

        // Removing from an empty cache is a no-op...
        assert_eq!(lru.remove_oldest(), false);

        lru.put("a".to_owned(), "1".to_owned());
        lru.put("b".to_owned(), "2".to_owned());
        assert_eq!(lru.remove_oldest(), true);

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.allocated_memory(), 2);
        assert_eq!(evicted.lock().unwrap().as_slice(), &["a=1".to_owned()]);
    }

    #[test]
    fn memory_bookkeeping_matches_contents() {
        let mut lru = LRUCache::new(64);
        let keys: Vec<String> = (0..40).map(|i| format!("k{}", i % 13)).collect();

        for (index, key) in keys.iter().enumerate() {
            lru.put(key.clone(), "x".repeat(index % 7));
            if index % 3 == 0 {
                let _ = lru.get(&keys[index / 2]);
            }

            let expected = expected_memory(&lru);
            assert_eq!(lru.allocated_memory(), expected);
            assert!(lru.allocated_memory() <= lru.max_memory());
        }
    }
}
