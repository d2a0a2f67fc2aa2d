//! Batch lock acquisition.
//!
//! A batch operation over a set of keys computes the distinct bucket
//! indices it touches and acquires them in ascending order, writers as
//! writers and readers as readers. Ascending acquisition is the
//! deadlock-freedom argument: two overlapping batches always contend on
//! their shared buckets in the same order. Guards release together when
//! the batch value drops.

use crate::bucket::Chain;
use crate::table::Store;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use shelf_core::key::{bucket_index, validate_key, validate_value, KeyError};

/// The sorted, deduplicated bucket set of a key list.
///
/// Keys with no bucket (first byte not alphanumeric) contribute nothing;
/// the operations layer reports them per-key instead.
pub fn bucket_set<I, S>(keys: I) -> Vec<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set: Vec<usize> = keys
        .into_iter()
        .filter_map(|k| bucket_index(k.as_ref()))
        .collect();
    set.sort_unstable();
    set.dedup();
    set
}

impl Store {
    /// Write-lock every bucket the key set touches, ascending.
    pub fn lock_for_write<I, S>(&self, keys: I) -> WriteBatch<'_>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let guards = bucket_set(keys)
            .into_iter()
            .map(|index| (index, self.bucket(index).write()))
            .collect();
        WriteBatch { guards }
    }

    /// Read-lock every bucket the key set touches, ascending.
    pub fn lock_for_read<I, S>(&self, keys: I) -> ReadBatch<'_>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let guards = bucket_set(keys)
            .into_iter()
            .map(|index| (index, self.bucket(index).read()))
            .collect();
        ReadBatch { guards }
    }
}

/// Write guards over a batch's bucket set.
///
/// Operations may only name keys drawn from the list the batch was
/// locked with; other keys hash to buckets this batch never acquired.
pub struct WriteBatch<'a> {
    guards: Vec<(usize, RwLockWriteGuard<'a, Chain>)>,
}

impl WriteBatch<'_> {
    fn chain_mut(&mut self, index: usize) -> Option<&mut Chain> {
        let slot = self
            .guards
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()?;
        Some(&mut *self.guards[slot].1)
    }

    /// Insert or overwrite one pair. Returns `true` on overwrite.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool, KeyError> {
        validate_key(key)?;
        validate_value(value)?;
        let index = bucket_index(key).ok_or(KeyError::NoBucket)?;
        debug_assert!(
            self.guards.iter().any(|(i, _)| *i == index),
            "key outside the locked bucket set"
        );
        match self.chain_mut(index) {
            Some(chain) => Ok(chain.set(key, value)),
            None => Err(KeyError::NoBucket),
        }
    }

    /// Remove one key. Returns `true` when an entry was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        match bucket_index(key) {
            Some(index) => self
                .chain_mut(index)
                .map(|chain| chain.remove(key))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Number of buckets held by this batch.
    pub fn bucket_count(&self) -> usize {
        self.guards.len()
    }
}

/// Read guards over a batch's bucket set.
pub struct ReadBatch<'a> {
    guards: Vec<(usize, RwLockReadGuard<'a, Chain>)>,
}

impl ReadBatch<'_> {
    /// Look up one key within the locked set.
    pub fn get(&self, key: &str) -> Option<&str> {
        let index = bucket_index(key)?;
        let slot = self
            .guards
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()?;
        self.guards[slot].1.get(key)
    }

    /// Number of buckets held by this batch.
    pub fn bucket_count(&self) -> usize {
        self.guards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_set_is_sorted_and_distinct() {
        let set = bucket_set(["zebra", "apple", "ant", "0zero", "zoo"]);
        // a=0, 0=0, z=25; duplicates collapse
        assert_eq!(set, vec![0, 25]);
    }

    #[test]
    fn test_bucket_set_skips_unbucketable_keys() {
        let set = bucket_set(["-dash", "|pipe"]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_write_batch_multi_bucket() {
        let store = Store::new();
        let keys = ["apple", "zebra"];
        {
            let mut batch = store.lock_for_write(keys);
            assert_eq!(batch.bucket_count(), 2);
            batch.set("apple", "1").unwrap();
            batch.set("zebra", "2").unwrap();
        }
        assert_eq!(store.get("apple"), Some("1".to_string()));
        assert_eq!(store.get("zebra"), Some("2".to_string()));
    }

    #[test]
    fn test_write_batch_reports_overwrite() {
        let store = Store::new();
        store.set("apple", "old").unwrap();
        let mut batch = store.lock_for_write(["apple"]);
        assert_eq!(batch.set("apple", "new"), Ok(true));
    }

    #[test]
    fn test_read_batch_sees_committed_values() {
        let store = Store::new();
        store.set("apple", "1").unwrap();
        let batch = store.lock_for_read(["apple", "zebra"]);
        assert_eq!(batch.get("apple"), Some("1"));
        assert_eq!(batch.get("zebra"), None);
    }

    #[test]
    fn test_remove_in_batch() {
        let store = Store::new();
        store.set("apple", "1").unwrap();
        {
            let mut batch = store.lock_for_write(["apple", "zebra"]);
            assert!(batch.remove("apple"));
            assert!(!batch.remove("zebra"));
        }
        assert_eq!(store.get("apple"), None);
    }

    #[test]
    fn test_unbucketable_key_inside_batch() {
        let store = Store::new();
        let mut batch = store.lock_for_write(["apple"]);
        assert_eq!(batch.set("-dash", "x"), Err(KeyError::NoBucket));
        assert!(!batch.remove("-dash"));
    }

    #[test]
    fn test_same_bucket_batch_holds_one_lock() {
        let store = Store::new();
        let batch = store.lock_for_read(["apple", "avocado", "Almond"]);
        assert_eq!(batch.bucket_count(), 1);
    }
}
