use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    kv::{bounds, KvPair, KvStore, Order, WriteOp},
    StoreError,
};

/// Write buffer over another [`KvStore`].
///
/// Reads see the buffered writes. Nothing reaches the inner store until
/// [`Overlay::commit`], which applies every buffered write in one
/// [`KvStore::write_batch`]. Dropping the overlay discards the writes.
#[derive(Debug)]
pub struct Overlay<S> {
    inner: S,
    pending: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl<S: KvStore> Overlay<S> {
    /// Wrap `inner` with an empty buffer
    pub fn new(inner: S) -> Self {
        Self { inner, pending: Mutex::new(BTreeMap::new()) }
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.pending.lock().len()
    }

    /// Apply the buffered writes to the inner store.
    pub fn commit(self) -> Result<(), StoreError> {
        let pending = self.pending.into_inner();
        trace!(target: "batchsig::store", writes = pending.len(), "Committing overlay");
        let ops = pending
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WriteOp::Put(key, value),
                None => WriteOp::Delete(key),
            })
            .collect();
        self.inner.write_batch(ops)
    }
}

impl<S: KvStore> KvStore for Overlay<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.pending.lock().get(key) {
            return Ok(value.clone());
        }
        self.inner.get(key)
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.pending.lock().insert(key, Some(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.pending.lock().insert(key.to_vec(), None);
        Ok(())
    }

    fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        order: Order,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>, StoreError> {
        let Some(range) = bounds(start, end) else { return Ok(Vec::new()) };
        let pending = self.pending.lock();
        let buffered: Vec<(&Vec<u8>, &Option<Vec<u8>>)> = pending.range::<[u8], _>(range).collect();

        // every buffered key shadows at most one inner key
        let inner_limit = limit.map(|limit| limit.saturating_add(buffered.len()));
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.inner.range(start, end, order, inner_limit)?.into_iter().collect();

        // inner results stop at the limit; buffered keys past the last inner key
        // may only be merged when the inner scan was exhaustive
        let exhaustive = inner_limit.is_none_or(|limit| merged.len() < limit);
        let frontier = match order {
            Order::Ascending => merged.keys().next_back().cloned(),
            Order::Descending => merged.keys().next().cloned(),
        };
        for (key, value) in buffered {
            let within = exhaustive ||
                frontier.as_ref().is_some_and(|frontier| match order {
                    Order::Ascending => key <= frontier,
                    Order::Descending => key >= frontier,
                });
            if !within {
                continue;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let limit = limit.unwrap_or(usize::MAX);
        Ok(match order {
            Order::Ascending => merged.into_iter().take(limit).collect(),
            Order::Descending => merged.into_iter().rev().take(limit).collect(),
        })
    }

    fn delete_range(&self, start: &[u8], end: Option<&[u8]>) -> Result<usize, StoreError> {
        let keys: Vec<Vec<u8>> =
            self.range(start, end, Order::Ascending, None)?.into_iter().map(|(k, _)| k).collect();

        let mut pending = self.pending.lock();
        let buffered: Vec<Vec<u8>> = match bounds(start, end) {
            Some(range) => pending.range::<[u8], _>(range).map(|(k, _)| k.clone()).collect(),
            None => Vec::new(),
        };
        for key in buffered.into_iter().chain(keys.iter().cloned()) {
            pending.insert(key, None);
        }
        Ok(keys.len())
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();
        for op in ops {
            match op {
                WriteOp::Put(key, value) => pending.insert(key, Some(value)),
                WriteOp::Delete(key) => pending.insert(key, None),
            };
        }
        Ok(())
    }
}

/// Run `f` against a fresh [`Overlay`] over `store`, committing only if it
/// returns `Ok`.
pub fn with_transaction<S, T, E, F>(store: &S, f: F) -> Result<T, E>
where
    S: KvStore,
    E: From<StoreError>,
    F: FnOnce(&Overlay<&S>) -> Result<T, E>,
{
    let overlay = Overlay::new(store);
    let out = f(&overlay)?;
    overlay.commit()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn base() -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0u8..6 {
            store.put(vec![1, i], vec![i]).unwrap();
        }
        store
    }

    fn keys(pairs: Vec<KvPair>) -> Vec<Vec<u8>> {
        pairs.into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_reads_see_buffered_writes() {
        let store = base();
        let overlay = Overlay::new(&store);
        overlay.put(vec![1, 9], vec![9]).unwrap();
        overlay.delete(&[1, 0]).unwrap();

        assert_eq!(overlay.get(&[1, 9]).unwrap(), Some(vec![9]));
        assert_eq!(overlay.get(&[1, 0]).unwrap(), None);
        assert_eq!(store.get(&[1, 0]).unwrap(), Some(vec![0]));
        assert_eq!(store.get(&[1, 9]).unwrap(), None);
    }

    #[test]
    fn test_limited_range_skips_deleted_keys() {
        let store = base();
        let overlay = Overlay::new(&store);
        overlay.delete(&[1, 0]).unwrap();
        overlay.delete(&[1, 1]).unwrap();

        let asc = overlay.range(&[1], Some(&[2]), Order::Ascending, Some(2)).unwrap();
        assert_eq!(keys(asc), vec![vec![1, 2], vec![1, 3]]);

        overlay.put(vec![1, 7], vec![7]).unwrap();
        let desc = overlay.range(&[1], Some(&[2]), Order::Descending, Some(2)).unwrap();
        assert_eq!(keys(desc), vec![vec![1, 7], vec![1, 5]]);
    }

    #[test]
    fn test_buffered_key_beyond_inner_limit_not_reported_early() {
        let store = base();
        let overlay = Overlay::new(&store);
        overlay.put(vec![1, 2, 5], vec![0]).unwrap();

        let asc = overlay.range(&[1], Some(&[2]), Order::Ascending, Some(4)).unwrap();
        assert_eq!(keys(asc), vec![vec![1, 0], vec![1, 1], vec![1, 2], vec![1, 2, 5]]);
    }

    #[test]
    fn test_delete_range_masks_inner_and_buffered() {
        let store = base();
        let overlay = Overlay::new(&store);
        overlay.put(vec![1, 3, 1], vec![0]).unwrap();

        assert_eq!(overlay.delete_range(&[1, 2], Some(&[1, 4])).unwrap(), 3);
        let left = keys(overlay.range(&[1], None, Order::Ascending, None).unwrap());
        assert_eq!(left, vec![vec![1, 0], vec![1, 1], vec![1, 4], vec![1, 5]]);
    }

    #[test]
    fn test_transaction_commits_on_ok_only() {
        let store = base();

        let failed: Result<(), StoreError> = with_transaction(&store, |tx| {
            tx.delete(&[1, 0])?;
            Err(StoreError::Backend("boom".into()))
        });
        assert!(failed.is_err());
        assert!(store.contains(&[1, 0]).unwrap());

        with_transaction::<_, _, StoreError, _>(&store, |tx| tx.delete(&[1, 0])).unwrap();
        assert!(!store.contains(&[1, 0]).unwrap());
    }
}
