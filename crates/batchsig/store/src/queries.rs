//! Read-only queries served to external clients

use batchsig_primitives::{Batch, BatchSignatures, DataResult, DataResultKey, TreeEntries};
use serde::{Deserialize, Serialize};

use crate::{batch_store::decode, keys, BatchStore, KvStore, Order, StoreError};

/// Default page size of [`BatchStore::query_batches`]
pub const DEFAULT_PAGE_LIMIT: u64 = 100;

/// Which batch to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchQuery {
    /// Batch with the given number
    Number(u64),
    /// Most recent batch
    Latest,
}

/// A batch together with its tree entries and collected signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Batch record
    pub batch: Batch,
    /// Entries the batch roots were computed from
    pub entries: TreeEntries,
    /// Signatures collected so far
    pub signatures: Vec<BatchSignatures>,
}

/// Pagination keyed by batch number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Return batches with numbers strictly greater than this
    pub start_after: Option<u64>,
    /// Page size, [`DEFAULT_PAGE_LIMIT`] when zero
    pub limit: u64,
}

/// One page of batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchesResponse {
    /// Batches in ascending number order
    pub batches: Vec<BatchResponse>,
    /// `start_after` of the next page, if there is one
    pub next: Option<u64>,
}

/// A data result and the batch it was assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResultResponse {
    /// Data result
    pub data_result: DataResult,
    /// Number of the batch that committed it
    pub batch_assignment: Option<u64>,
}

impl<S: KvStore> BatchStore<S> {
    fn batch_response(&self, batch: Batch) -> Result<BatchResponse, StoreError> {
        let entries = self.get_tree_entries(batch.batch_number)?;
        let signatures = self.get_signatures_for_batch(batch.batch_number)?;
        Ok(BatchResponse { batch, entries, signatures })
    }

    /// Batch by number, or the latest one.
    pub fn query_batch(&self, query: BatchQuery) -> Result<BatchResponse, StoreError> {
        let batch = match query {
            BatchQuery::Number(number) => self.get_batch_by_number(number)?,
            BatchQuery::Latest => self.get_latest_batch()?,
        };
        self.batch_response(batch)
    }

    /// Batch created at `height`.
    pub fn query_batch_for_height(&self, height: i64) -> Result<BatchResponse, StoreError> {
        let batch = self.get_batch_for_height(height)?;
        self.batch_response(batch)
    }

    /// Page through batches in ascending order.
    ///
    /// Without `with_unsigned`, batches that have no signature yet are skipped
    /// (they still advance the cursor).
    pub fn query_batches(&self, page: PageRequest, with_unsigned: bool) -> Result<BatchesResponse, StoreError> {
        let limit = if page.limit == 0 { DEFAULT_PAGE_LIMIT } else { page.limit };
        let first = match page.start_after {
            Some(after) => match after.checked_add(1) {
                Some(first) => first,
                None => return Ok(BatchesResponse { batches: Vec::new(), next: None }),
            },
            None => 0,
        };

        let fetch = usize::try_from(limit).unwrap_or(usize::MAX).saturating_add(1);
        let mut found = self.get_batches_in_range(first, u64::MAX, Some(fetch))?;
        let next = if found.len() > fetch - 1 {
            found.truncate(fetch - 1);
            found.last().map(|batch| batch.batch_number)
        } else {
            None
        };

        let mut batches = Vec::with_capacity(found.len());
        for batch in found {
            let response = self.batch_response(batch)?;
            if with_unsigned || !response.signatures.is_empty() {
                batches.push(response);
            }
        }
        Ok(BatchesResponse { batches, next })
    }

    /// Data result by key with its batch assignment, from either collection.
    pub fn query_data_result(&self, dr: &DataResultKey) -> Result<DataResultResponse, StoreError> {
        let data_result = match self.get_data_result(dr)? {
            Some(result) => result,
            None => self.get_legacy_data_result(dr)?.ok_or_else(|| {
                StoreError::NotFound(format!("data result {} at height {}", dr.dr_id, dr.dr_block_height))
            })?,
        };
        let batch_assignment = self.get_batch_assignment(dr)?;
        Ok(DataResultResponse { data_result, batch_assignment })
    }

    /// Latest batches first, up to `limit`.
    pub fn recent_batches(&self, limit: usize) -> Result<Vec<Batch>, StoreError> {
        let prefix = [keys::BATCH_PREFIX];
        self.kv()
            .range(&prefix, keys::prefix_end(&prefix).as_deref(), Order::Descending, Some(limit))?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use alloy_primitives::{Address, Bytes, B256};
    use assert_matches::assert_matches;

    fn store(count: u64) -> BatchStore<MemoryStore> {
        let store = BatchStore::new(MemoryStore::new());
        for n in 1..=count {
            let mut batch = Batch {
                batch_number: n,
                block_height: n as i64,
                current_data_result_root: B256::ZERO,
                data_result_root: B256::ZERO,
                validator_root: B256::ZERO,
                batch_id: B256::ZERO,
                proving_metadata: Bytes::new(),
            };
            batch.batch_id = batch.compute_id();
            store.set_new_batch(&batch, &TreeEntries::default()).unwrap();
            if n % 2 == 0 {
                let sig = BatchSignatures {
                    validator_address: Address::repeat_byte(1),
                    voting_power: 1,
                    signatures: Bytes::from(vec![0u8; 64]),
                };
                store.set_batch_signature(n, &sig).unwrap();
            }
        }
        store
    }

    fn numbers(response: &BatchesResponse) -> Vec<u64> {
        response.batches.iter().map(|b| b.batch.batch_number).collect()
    }

    #[test]
    fn test_query_batch() {
        let store = store(3);
        assert_eq!(store.query_batch(BatchQuery::Latest).unwrap().batch.batch_number, 3);
        assert_eq!(store.query_batch(BatchQuery::Number(2)).unwrap().signatures.len(), 1);
        assert_eq!(store.query_batch_for_height(1).unwrap().batch.batch_number, 1);
        assert_matches!(store.query_batch(BatchQuery::Number(9)), Err(StoreError::NotFound(_)));
    }

    #[test]
    fn test_pagination() {
        let store = store(5);

        let first = store.query_batches(PageRequest { start_after: None, limit: 2 }, true).unwrap();
        assert_eq!(numbers(&first), vec![1, 2]);
        assert_eq!(first.next, Some(2));

        let second = store.query_batches(PageRequest { start_after: first.next, limit: 2 }, true).unwrap();
        assert_eq!(numbers(&second), vec![3, 4]);

        let last = store.query_batches(PageRequest { start_after: second.next, limit: 2 }, true).unwrap();
        assert_eq!(numbers(&last), vec![5]);
        assert_eq!(last.next, None);
    }

    #[test]
    fn test_signed_only() {
        let store = store(5);
        let page = store.query_batches(PageRequest::default(), false).unwrap();
        assert_eq!(numbers(&page), vec![2, 4]);
        assert_eq!(page.next, None);
    }

    #[test]
    fn test_recent_batches() {
        let store = store(4);
        let recent: Vec<u64> = store.recent_batches(2).unwrap().iter().map(|b| b.batch_number).collect();
        assert_eq!(recent, vec![4, 3]);
    }
}
