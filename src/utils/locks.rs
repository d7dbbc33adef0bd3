use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// One mutex per key, created on demand and dropped once nobody holds or
/// waits on it.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`. The entry is released even
    /// if `f` panics.
    pub fn with<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let handle = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let release = Release {
            locks: self,
            key,
            handle,
        };
        let _guard = release.handle.lock();
        f()
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops the map entry for `key` once its last user is done.
struct Release<'a, K: Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: &'a K,
    handle: Arc<Mutex<()>>,
}

impl<K: Eq + Hash> Drop for Release<'_, K> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock();
        // the map and `handle` are the only owners left
        if Arc::strong_count(&self.handle) == 2 {
            locks.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    locks.with(&"key", || {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn test_panicking_holder_releases_the_key() {
        let locks = KeyedLocks::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            locks.with(&"key", || panic!("holder failed"))
        }));
        assert!(outcome.is_err());
        assert!(locks.is_empty());
        assert_eq!(locks.with(&"key", || 7), 7);
    }
}
