//! The store: 26 buckets, each behind its own reader/writer lock.

use crate::bucket::Chain;
use parking_lot::RwLock;
use shelf_core::key::{bucket_index, validate_key, validate_value, KeyError};
use shelf_core::limits::BUCKET_COUNT;

/// The shared key-value table.
///
/// Created once at startup and shared behind an `Arc`; destroyed at
/// shutdown after every worker has joined. A key lives in exactly one
/// bucket (its first byte picks the index), and within a bucket keys are
/// unique, so a key appears in at most one entry table-wide.
pub struct Store {
    buckets: [RwLock<Chain>; BUCKET_COUNT],
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Store {
            buckets: std::array::from_fn(|_| RwLock::new(Chain::new())),
        }
    }

    pub(crate) fn bucket(&self, index: usize) -> &RwLock<Chain> {
        &self.buckets[index]
    }

    /// Insert or overwrite a single pair under its bucket's write lock.
    ///
    /// Returns `true` when an existing entry was overwritten.
    pub fn set(&self, key: &str, value: &str) -> Result<bool, KeyError> {
        validate_key(key)?;
        validate_value(value)?;
        let index = bucket_index(key).ok_or(KeyError::NoBucket)?;
        Ok(self.buckets[index].write().set(key, value))
    }

    /// Read a single key under its bucket's read lock.
    pub fn get(&self, key: &str) -> Option<String> {
        let index = bucket_index(key)?;
        self.buckets[index].read().get(key).map(str::to_string)
    }

    /// Remove a single key under its bucket's write lock.
    ///
    /// Returns `true` when an entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        match bucket_index(key) {
            Some(index) => self.buckets[index].write().remove(key),
            None => false,
        }
    }

    /// Advisory existence check: read-lock the bucket, scan, release.
    ///
    /// The answer can go stale the moment the lock drops; callers that
    /// subscribe on the strength of it get notifications for future
    /// writes, not a guarantee the key still exists.
    pub fn contains_key(&self, key: &str) -> bool {
        match bucket_index(key) {
            Some(index) => self.buckets[index].read().contains(key),
            None => false,
        }
    }

    /// Total entry count, taken bucket by bucket.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.read().is_empty())
    }

    /// Visit every entry in bucket-index order under all 26 read locks.
    ///
    /// This is a consistent snapshot with respect to writers, at the
    /// price of blocking them for the duration. Locks are acquired in
    /// ascending index order, same as every batch.
    pub fn for_each_entry<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &str),
    {
        let guards: Vec<_> = self.buckets.iter().map(|b| b.read()).collect();
        for guard in &guards {
            for (key, value) in guard.iter() {
                visit(key, value);
            }
        }
    }

    /// Visit every entry without taking any lock.
    ///
    /// # Safety
    ///
    /// Only callable from a freshly forked child process, where no other
    /// thread exists to mutate the table. A lock captured mid-write by
    /// the fork would never be released in the child, so the child must
    /// not try to acquire it; it reads the copy-on-write image directly
    /// and tolerates whatever in-flight state the fork captured.
    pub unsafe fn for_each_entry_unsynchronized<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &str),
    {
        for bucket in &self.buckets {
            let chain = &*bucket.data_ptr();
            for (key, value) in chain.iter() {
                visit(key, value);
            }
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_store_is_empty() {
        let store = Store::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_read_after_write() {
        let store = Store::new();
        assert_eq!(store.set("apple", "red"), Ok(false));
        assert_eq!(store.get("apple"), Some("red".to_string()));
    }

    #[test]
    fn test_overwrite_reports_previous_entry() {
        let store = Store::new();
        assert_eq!(store.set("apple", "red"), Ok(false));
        assert_eq!(store.set("apple", "green"), Ok(true));
        assert_eq!(store.get("apple"), Some("green".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_then_remove_again() {
        let store = Store::new();
        store.set("zebra", "stripes").unwrap();
        assert!(store.remove("zebra"));
        assert!(!store.remove("zebra"));
        assert_eq!(store.get("zebra"), None);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let store = Store::new();
        assert_eq!(store.set("", "x"), Err(KeyError::Empty));
        assert_eq!(store.set("-dash", "x"), Err(KeyError::NoBucket));
        assert_eq!(store.get("-dash"), None);
        assert!(!store.remove("-dash"));
        assert!(!store.contains_key("-dash"));
    }

    #[test]
    fn test_digit_and_letter_share_bucket_but_not_entry() {
        let store = Store::new();
        store.set("0key", "zero").unwrap();
        store.set("apple", "fruit").unwrap();
        assert_eq!(store.get("0key"), Some("zero".to_string()));
        assert_eq!(store.get("apple"), Some("fruit".to_string()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_contains_key() {
        let store = Store::new();
        assert!(!store.contains_key("apple"));
        store.set("apple", "1").unwrap();
        assert!(store.contains_key("apple"));
    }

    #[test]
    fn test_for_each_entry_bucket_order() {
        let store = Store::new();
        store.set("cat", "1").unwrap();
        store.set("apple", "2").unwrap();
        store.set("bat", "3").unwrap();

        let mut keys = Vec::new();
        store.for_each_entry(|k, _| keys.push(k.to_string()));
        assert_eq!(keys, vec!["apple", "bat", "cat"]);
    }

    #[test]
    fn test_uniqueness_across_mixed_operations() {
        // After any sequence of writes and deletes, a key appears at most
        // once in a full scan.
        let store = Store::new();
        for round in 0..10 {
            store.set("apple", &round.to_string()).unwrap();
            store.set("avocado", "x").unwrap();
            store.remove("avocado");
        }
        let mut seen = std::collections::HashMap::new();
        store.for_each_entry(|k, _| {
            *seen.entry(k.to_string()).or_insert(0usize) += 1;
        });
        assert_eq!(seen.get("apple"), Some(&1));
        assert_eq!(seen.get("avocado"), None);
    }

    #[test]
    fn test_concurrent_writers_same_bucket() {
        let store = Arc::new(Store::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..100 {
                        store.set(&format!("a{}-{}", t, i), "v").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }

    #[test]
    fn test_unsynchronized_dump_matches_locked_dump() {
        let store = Store::new();
        store.set("apple", "1").unwrap();
        store.set("bat", "2").unwrap();

        let mut locked = Vec::new();
        store.for_each_entry(|k, v| locked.push((k.to_string(), v.to_string())));

        let mut raw = Vec::new();
        // No other thread is mutating the table here, which is the same
        // quiescence a forked child sees.
        unsafe {
            store.for_each_entry_unsynchronized(|k, v| raw.push((k.to_string(), v.to_string())));
        }
        assert_eq!(locked, raw);
    }
}
