//! Generic thread-safe key/value store.
//!
//! Used as the application-wide cache for values that must survive a
//! bootstrap/reset cycle.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// Thread-safe map with clone-out reads.
#[derive(Debug)]
pub struct Store<K, V> {
    data: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Store<K, V> {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.data.read().get(key).cloned()
    }

    pub fn has(&self, key: &K) -> bool {
        self.data.read().contains_key(key)
    }

    /// Insert or replace, returning the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.data.write().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.write().remove(key)
    }

    /// Return the existing value or insert the one produced by `init`.
    ///
    /// `init` runs under the write lock and at most once per missing key.
    pub fn get_or_set(&self, key: K, init: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        self.data.write().entry(key).or_insert_with(init).clone()
    }

    pub fn length(&self) -> usize {
        self.data.read().len()
    }

    pub fn values(&self) -> Vec<V> {
        self.data.read().values().cloned().collect()
    }

    /// Replace the whole content.
    pub fn reset(&self, data: HashMap<K, V>) {
        *self.data.write() = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_basic_operations() {
        let store: Store<String, i32> = Store::new();
        assert_eq!(store.set("a".into(), 1), None);
        assert_eq!(store.set("a".into(), 2), Some(1));
        assert!(store.has(&"a".to_string()));
        assert_eq!(store.get(&"a".to_string()), Some(2));
        assert_eq!(store.length(), 1);
        assert_eq!(store.remove(&"a".to_string()), Some(2));
        assert_eq!(store.length(), 0);
    }

    #[test]
    fn test_get_or_set_initializes_once() {
        let store: Arc<Store<&'static str, usize>> = Arc::new(Store::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || store.get_or_set("key", || n))
            })
            .collect();

        let values: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.length(), 1);
    }

    #[test]
    fn test_reset_replaces_content() {
        let store: Store<&str, i32> = Store::new();
        store.set("old", 1);
        store.reset(HashMap::from([("new", 2)]));
        assert_eq!(store.get(&"old"), None);
        assert_eq!(store.get(&"new"), Some(2));
    }
}
