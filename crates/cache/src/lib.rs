//! Bounded key/value caches for suppressing duplicate work.
//!
//! [`FastStore`] evicts the oldest-inserted entry once it is full. Reads do
//! not refresh an entry's position. [`FastStore::check_and_insert`] is the
//! one operation callers should use when "seen before?" and "mark as seen"
//! must not interleave with another thread.
//!
//! [`ExpiringStore`] adds a maximum age on top for callers that need it.

#![deny(unsafe_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn insert(&mut self, key: K, value: V, capacity: usize) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        while self.entries.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry.value)
    }

    fn is_stale(&self, key: &K, max_age: Option<Duration>) -> bool {
        match (self.entries.get(key), max_age) {
            (Some(entry), Some(max_age)) => entry.inserted_at.elapsed() >= max_age,
            _ => false,
        }
    }
}

/// Capacity-bounded FIFO cache. All operations take one lock, so each is
/// atomic with respect to the others.
pub struct FastStore<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> FastStore<K, V> {
    /// A cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).map(|e| e.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Insert or replace. Replacing moves the key to the young end.
    pub fn put(&self, key: K, value: V) {
        self.inner.lock().insert(key, value, self.capacity);
    }

    /// Insert `value` unless `key` is already present. Returns `true` if
    /// this call inserted it.
    pub fn check_and_insert(&self, key: K, value: V) -> bool {
        self.check_and_insert_within(key, value, None)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_within(&self, key: &K, max_age: Option<Duration>) -> Option<V> {
        let mut inner = self.inner.lock();
        if inner.is_stale(key, max_age) {
            inner.remove(key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    fn check_and_insert_within(&self, key: K, value: V, max_age: Option<Duration>) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_stale(&key, max_age) {
            inner.remove(&key);
        }
        if inner.entries.contains_key(&key) {
            return false;
        }
        inner.insert(key, value, self.capacity);
        true
    }
}

impl<K, V> std::fmt::Debug for FastStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastStore")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.lock().entries.len())
            .finish()
    }
}

/// [`FastStore`] whose entries also lapse after `max_age`.
#[derive(Debug)]
pub struct ExpiringStore<K, V> {
    store: FastStore<K, V>,
    max_age: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpiringStore<K, V> {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            store: FastStore::new(capacity),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.store.get_within(key, Some(self.max_age))
    }

    pub fn put(&self, key: K, value: V) {
        self.store.put(key, value);
    }

    /// Like [`FastStore::check_and_insert`]; an expired entry counts as absent.
    pub fn check_and_insert(&self, key: K, value: V) -> bool {
        self.store
            .check_and_insert_within(key, value, Some(self.max_age))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.store.remove(key)
    }

    /// Entries currently held, including ones that have expired but not
    /// yet been touched.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fifo_eviction_ignores_reads() {
        let cache = FastStore::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reput_moves_to_young_end() {
        let cache = FastStore::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_check_and_insert() {
        let cache = FastStore::new(10);
        assert!(cache.check_and_insert("k", ()));
        assert!(!cache.check_and_insert("k", ()));
        assert_eq!(cache.remove(&"k"), Some(()));
        assert!(cache.check_and_insert("k", ()));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = FastStore::new(0);
        cache.put(1, 1);
        cache.put(2, 2);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.get(&2), Some(2));
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_concurrent_check_and_insert_has_one_winner() {
        let cache = Arc::new(FastStore::new(500));
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if cache.check_and_insert("C.1234".to_string(), ()) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expiring_store_lapses() {
        let cache = ExpiringStore::new(10, Duration::from_millis(20));
        assert!(cache.check_and_insert("k", 1));
        assert!(!cache.check_and_insert("k", 2));
        assert_eq!(cache.get(&"k"), Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.check_and_insert("k", 3));
        assert_eq!(cache.get(&"k"), Some(3));
    }

    proptest::proptest! {
        #[test]
        fn prop_never_exceeds_capacity(cap in 1usize..16, keys in proptest::collection::vec(0u8..32, 0..128)) {
            let cache = FastStore::new(cap);
            for k in &keys {
                cache.put(*k, ());
            }
            proptest::prop_assert!(cache.len() <= cap);
            if let Some(last) = keys.last() {
                proptest::prop_assert!(cache.contains(last));
            }
        }
    }
}
