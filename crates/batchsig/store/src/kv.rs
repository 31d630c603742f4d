use std::{collections::BTreeMap, ops::Bound};

use auto_impl::auto_impl;
use parking_lot::RwLock;

use crate::StoreError;

/// A key and its value
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Iteration order of a range scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Smallest key first
    Ascending,
    /// Largest key first
    Descending,
}

/// A single write applied by [`KvStore::write_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite
    Put(Vec<u8>, Vec<u8>),
    /// Remove if present
    Delete(Vec<u8>),
}

/// Ordered byte-keyed map.
///
/// Ranges are `[start, end)`; a missing `end` scans to the end of the keyspace.
#[auto_impl(&, Arc)]
pub trait KvStore {
    /// Value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite `key`
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove `key` if present
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Up to `limit` pairs with keys in `[start, end)`, in `order`.
    fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        order: Order,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>, StoreError>;

    /// Remove every key in `[start, end)`, returning how many were removed.
    fn delete_range(&self, start: &[u8], end: Option<&[u8]>) -> Result<usize, StoreError>;

    /// Apply `ops` atomically
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Whether `key` is present
    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

pub(crate) fn bounds<'a>(start: &'a [u8], end: Option<&'a [u8]>) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
    match end {
        Some(end) if end <= start => None,
        Some(end) => Some((Bound::Included(start), Bound::Excluded(end))),
        None => Some((Bound::Included(start), Bound::Unbounded)),
    }
}

/// In-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        order: Order,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>, StoreError> {
        let Some(bounds) = bounds(start, end) else { return Ok(Vec::new()) };
        let map = self.inner.read();
        let iter = map.range::<[u8], _>(bounds).map(|(k, v)| (k.clone(), v.clone()));
        let limit = limit.unwrap_or(usize::MAX);
        Ok(match order {
            Order::Ascending => iter.take(limit).collect(),
            Order::Descending => iter.rev().take(limit).collect(),
        })
    }

    fn delete_range(&self, start: &[u8], end: Option<&[u8]>) -> Result<usize, StoreError> {
        let Some(bounds) = bounds(start, end) else { return Ok(0) };
        let mut map = self.inner.write();
        let keys: Vec<Vec<u8>> = map.range::<[u8], _>(bounds).map(|(k, _)| k.clone()).collect();
        for key in &keys {
            map.remove(key);
        }
        Ok(keys.len())
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut map = self.inner.write();
        for op in ops {
            match op {
                WriteOp::Put(key, value) => {
                    map.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(keys: &[&[u8]]) -> MemoryStore {
        let store = MemoryStore::new();
        for key in keys {
            store.put(key.to_vec(), key.to_vec()).unwrap();
        }
        store
    }

    fn keys(pairs: Vec<KvPair>) -> Vec<Vec<u8>> {
        pairs.into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_range_orders_and_limits() {
        let store = store_with(&[&[1, 1], &[1, 2], &[1, 3], &[2, 0]]);

        let asc = store.range(&[1], Some(&[2]), Order::Ascending, None).unwrap();
        assert_eq!(keys(asc), vec![vec![1, 1], vec![1, 2], vec![1, 3]]);

        let desc = store.range(&[1], Some(&[2]), Order::Descending, Some(2)).unwrap();
        assert_eq!(keys(desc), vec![vec![1, 3], vec![1, 2]]);

        assert!(store.range(&[3], Some(&[1]), Order::Ascending, None).unwrap().is_empty());
    }

    #[test]
    fn test_delete_range() {
        let store = store_with(&[&[1, 1], &[1, 2], &[2, 0]]);
        assert_eq!(store.delete_range(&[1], Some(&[2])).unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&[2, 0]).unwrap());
    }

    #[test]
    fn test_write_batch() {
        let store = store_with(&[&[1]]);
        store.write_batch(vec![WriteOp::Delete(vec![1]), WriteOp::Put(vec![2], vec![9])]).unwrap();
        assert_eq!(store.get(&[1]).unwrap(), None);
        assert_eq!(store.get(&[2]).unwrap(), Some(vec![9]));
    }
}
