use alloy_primitives::Address;
use batchsig_primitives::{
    Batch, BatchSignatures, DataResult, DataResultKey, OperatorAddress, PruningWatermark,
    TreeEntries, ValidatorTreeEntry, FIRST_BATCH_NUMBER,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use crate::{
    keys::{self, prefix_end},
    KvPair, KvStore, Order, StoreError,
};

/// Schema without the reverse batch -> data-result index.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Schema with split data-result collections and the reverse index.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_u64(key: &[u8], bytes: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| StoreError::MalformedKey(key.to_vec()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Typed access to the batching collections.
#[derive(Debug, Clone)]
pub struct BatchStore<S> {
    kv: S,
}

impl<S: KvStore> BatchStore<S> {
    /// Wrap a key-value store
    pub const fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Underlying key-value store
    pub const fn kv(&self) -> &S {
        &self.kv
    }

    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        self.kv.get(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn put_value<T: Serialize>(&self, key: Vec<u8>, value: &T) -> Result<(), StoreError> {
        self.kv.put(key, encode(value)?)
    }

    fn prefix_scan(&self, prefix: &[u8], order: Order, limit: Option<usize>) -> Result<Vec<KvPair>, StoreError> {
        self.kv.range(prefix, prefix_end(prefix).as_deref(), order, limit)
    }

    // --- batches ---

    /// Number the next created batch must carry.
    pub fn next_batch_number(&self) -> Result<u64, StoreError> {
        match self.kv.get(keys::BATCH_SEQUENCE_KEY)? {
            Some(bytes) => decode_u64(keys::BATCH_SEQUENCE_KEY, &bytes),
            None => Ok(FIRST_BATCH_NUMBER),
        }
    }

    /// Number of the latest batch.
    pub fn current_batch_number(&self) -> Result<u64, StoreError> {
        let next = self.next_batch_number()?;
        if next <= FIRST_BATCH_NUMBER {
            return Err(StoreError::BatchingNotStarted);
        }
        Ok(next - 1)
    }

    /// Persist a freshly built batch with its tree entries and advance the
    /// batch-number sequence.
    pub fn set_new_batch(&self, batch: &Batch, entries: &TreeEntries) -> Result<(), StoreError> {
        let expected = self.next_batch_number()?;
        if batch.batch_number != expected {
            return Err(StoreError::BatchNumberMismatch { expected, got: batch.batch_number });
        }
        let height_key = keys::batch_height(batch.block_height);
        if self.kv.contains(&height_key)? {
            return Err(StoreError::DuplicateBatchAtHeight(batch.block_height));
        }

        let number = batch.batch_number;
        self.put_value(keys::batch(number), batch)?;
        self.kv.put(height_key, number.to_be_bytes().to_vec())?;
        self.put_value(keys::tree_entries(number), entries)?;
        for entry in &entries.validator_entries {
            self.put_value(keys::validator_entry(number, &entry.validator_address), entry)?;
        }
        self.kv.put(keys::BATCH_SEQUENCE_KEY.to_vec(), (number + 1).to_be_bytes().to_vec())?;

        debug!(
            target: "batchsig::store",
            batch_number = number,
            height = batch.block_height,
            data_results = entries.data_result_entries.len(),
            validators = entries.validator_entries.len(),
            "Stored batch"
        );
        Ok(())
    }

    /// Batch created at `height`.
    pub fn get_batch_for_height(&self, height: i64) -> Result<Batch, StoreError> {
        let key = keys::batch_height(height);
        let bytes = self
            .kv
            .get(&key)?
            .ok_or_else(|| StoreError::NotFound(format!("batch at height {height}")))?;
        self.get_batch_by_number(decode_u64(&key, &bytes)?)
    }

    /// Batch with number `number`.
    pub fn get_batch_by_number(&self, number: u64) -> Result<Batch, StoreError> {
        self.get_value(&keys::batch(number))?.ok_or_else(|| StoreError::NotFound(format!("batch {number}")))
    }

    /// Most recent batch.
    pub fn get_latest_batch(&self) -> Result<Batch, StoreError> {
        self.get_batch_by_number(self.current_batch_number()?)
    }

    /// Batches with numbers in `[first, last]`, ascending, up to `limit`.
    pub fn get_batches_in_range(&self, first: u64, last: u64, limit: Option<usize>) -> Result<Vec<Batch>, StoreError> {
        let (start, end) = keys::per_batch_range(keys::BATCH_PREFIX, first, last);
        self.kv
            .range(&start, end.as_deref(), Order::Ascending, limit)?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Tree entries of batch `number`.
    pub fn get_tree_entries(&self, number: u64) -> Result<TreeEntries, StoreError> {
        self.get_value(&keys::tree_entries(number))?
            .ok_or_else(|| StoreError::NotFound(format!("tree entries of batch {number}")))
    }

    /// Validator tree entry of `operator` in batch `number`.
    pub fn get_validator_tree_entry(
        &self,
        number: u64,
        operator: &OperatorAddress,
    ) -> Result<ValidatorTreeEntry, StoreError> {
        self.get_value(&keys::validator_entry(number, operator))?.ok_or_else(|| {
            StoreError::NotFound(format!("validator tree entry of {operator} in batch {number}"))
        })
    }

    // --- signatures ---

    /// Record `validator`'s signature for batch `number`, replacing any earlier one.
    pub fn set_batch_signature(&self, number: u64, signatures: &BatchSignatures) -> Result<(), StoreError> {
        trace!(
            target: "batchsig::store",
            batch_number = number,
            validator = %signatures.validator_address,
            "Stored batch signature"
        );
        self.put_value(keys::signature(number, &signatures.validator_address), signatures)
    }

    /// Every signature collected for batch `number`, ordered by validator address.
    pub fn get_signatures_for_batch(&self, number: u64) -> Result<Vec<BatchSignatures>, StoreError> {
        if !self.kv.contains(&keys::batch(number))? {
            return Err(StoreError::NotFound(format!("batch {number}")));
        }
        self.prefix_scan(&keys::per_batch(keys::SIGNATURES_PREFIX, number), Order::Ascending, None)?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Signature of `validator` for batch `number`, if collected.
    pub fn get_batch_signature(
        &self,
        number: u64,
        validator: &Address,
    ) -> Result<Option<BatchSignatures>, StoreError> {
        self.get_value(&keys::signature(number, validator))
    }

    // --- data results ---

    /// Insert or replace a data result in the current collection.
    pub fn set_data_result(&self, result: &DataResult) -> Result<(), StoreError> {
        let dr = result.key();
        self.kv.delete(&keys::data_result(!result.batched, &dr))?;
        self.put_value(keys::data_result(result.batched, &dr), result)
    }

    /// Data result from the current collection, batched or not.
    pub fn get_data_result(&self, dr: &DataResultKey) -> Result<Option<DataResult>, StoreError> {
        match self.get_value(&keys::data_result(false, dr))? {
            Some(result) => Ok(Some(result)),
            None => self.get_value(&keys::data_result(true, dr)),
        }
    }

    /// Every data result not yet included in a batch, ordered by key.
    pub fn get_unbatched_data_results(&self) -> Result<Vec<DataResult>, StoreError> {
        self.prefix_scan(&keys::data_results_by_status(false), Order::Ascending, None)?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Move an unbatched result to the batched collection and record both
    /// directions of its assignment to batch `number`.
    pub fn mark_data_result_batched(&self, result: &DataResult, number: u64) -> Result<(), StoreError> {
        let dr = result.key();
        let batched = DataResult { batched: true, ..result.clone() };
        self.kv.delete(&keys::data_result(false, &dr))?;
        self.put_value(keys::data_result(true, &dr), &batched)?;
        self.kv.put(keys::batch_assignment(&dr), number.to_be_bytes().to_vec())?;
        self.kv.put(keys::batch_result(number, &dr), Vec::new())
    }

    /// Batch a data result was assigned to.
    pub fn get_batch_assignment(&self, dr: &DataResultKey) -> Result<Option<u64>, StoreError> {
        let key = keys::batch_assignment(dr);
        self.kv.get(&key)?.map(|bytes| decode_u64(&key, &bytes)).transpose()
    }

    /// Keys of the data results assigned to batch `number` through the reverse index.
    pub fn get_data_results_for_batch(&self, number: u64) -> Result<Vec<DataResultKey>, StoreError> {
        self.prefix_scan(&keys::per_batch(keys::BATCH_RESULTS_PREFIX, number), Order::Ascending, None)?
            .into_iter()
            .map(|(key, _)| keys::decode_dr_key(&key))
            .collect()
    }

    /// Remove every data result assigned to batch `number` together with its
    /// assignment rows. Returns the number of results removed.
    pub fn remove_data_results_for_batch(&self, number: u64) -> Result<usize, StoreError> {
        let results = self.get_data_results_for_batch(number)?;
        for dr in &results {
            self.kv.delete(&keys::data_result(true, dr))?;
            self.kv.delete(&keys::batch_assignment(dr))?;
            self.kv.delete(&keys::batch_result(number, dr))?;
        }
        Ok(results.len())
    }

    // --- legacy data results ---

    /// Insert a data result into the legacy collection.
    pub fn set_legacy_data_result(&self, result: &DataResult) -> Result<(), StoreError> {
        self.put_value(keys::legacy_data_result(&result.key()), result)
    }

    /// Legacy data result, if still present.
    pub fn get_legacy_data_result(&self, dr: &DataResultKey) -> Result<Option<DataResult>, StoreError> {
        self.get_value(&keys::legacy_data_result(dr))
    }

    /// Record a legacy batch assignment (forward index only).
    pub fn set_legacy_batch_assignment(&self, dr: &DataResultKey, number: u64) -> Result<(), StoreError> {
        self.kv.put(keys::batch_assignment(dr), number.to_be_bytes().to_vec())
    }

    /// Whether any legacy data result remains.
    pub fn has_legacy_data_results(&self) -> Result<bool, StoreError> {
        Ok(!self.prefix_scan(&[keys::LEGACY_DATA_RESULT_PREFIX], Order::Ascending, Some(1))?.is_empty())
    }

    /// Every legacy data result, ordered by key.
    pub fn get_legacy_data_results(&self) -> Result<Vec<DataResult>, StoreError> {
        self.prefix_scan(&[keys::LEGACY_DATA_RESULT_PREFIX], Order::Ascending, None)?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Up to `limit` legacy data-result keys visited from `offset` in `order`,
    /// wrapping around the end of the collection.
    ///
    /// Ascending walks `[offset, end)` then `[start, offset)`; descending walks
    /// `[start, offset)` downwards then `[offset, end)` downwards.
    pub fn legacy_data_result_keys_from(
        &self,
        offset: &[u8],
        order: Order,
        limit: usize,
    ) -> Result<Vec<DataResultKey>, StoreError> {
        let prefix = [keys::LEGACY_DATA_RESULT_PREFIX];
        let start = prefix.to_vec();
        let end = prefix_end(&prefix);
        let mut pivot = start.clone();
        pivot.extend_from_slice(offset);

        let (first, second) = match order {
            Order::Ascending => ((pivot.clone(), end.clone()), (start, Some(pivot))),
            Order::Descending => ((start, Some(pivot.clone())), (pivot, end)),
        };

        let mut pairs = self.kv.range(&first.0, first.1.as_deref(), order, Some(limit))?;
        if pairs.len() < limit {
            let remaining = limit - pairs.len();
            pairs.extend(self.kv.range(&second.0, second.1.as_deref(), order, Some(remaining))?);
        }
        pairs.into_iter().map(|(key, _)| keys::decode_dr_key(&key)).collect()
    }

    /// Remove a legacy data result and its forward assignment row.
    pub fn remove_legacy_data_result(&self, dr: &DataResultKey) -> Result<(), StoreError> {
        self.kv.delete(&keys::legacy_data_result(dr))?;
        self.kv.delete(&keys::batch_assignment(dr))
    }

    // --- removal ---

    /// Remove the batch records, tree entries and signatures of every batch
    /// in `[first, last]`.
    ///
    /// The batch records go last so a dangling entry always reads as pruned.
    /// Returns the number of batch records removed.
    pub fn remove_batches(&self, first: u64, last: u64) -> Result<usize, StoreError> {
        if first > last {
            return Ok(0);
        }
        for prefix in [keys::SIGNATURES_PREFIX, keys::VALIDATOR_ENTRY_PREFIX, keys::TREE_ENTRIES_PREFIX] {
            let (start, end) = keys::per_batch_range(prefix, first, last);
            self.kv.delete_range(&start, end.as_deref())?;
        }
        for batch in self.get_batches_in_range(first, last, None)? {
            self.kv.delete(&keys::batch_height(batch.block_height))?;
        }
        let (start, end) = keys::per_batch_range(keys::BATCH_PREFIX, first, last);
        let removed = self.kv.delete_range(&start, end.as_deref())?;

        debug!(target: "batchsig::store", first, last, removed, "Removed batches");
        Ok(removed)
    }

    /// Remove a single batch's records, tree entries and signatures.
    pub fn remove_batch(&self, number: u64) -> Result<bool, StoreError> {
        Ok(self.remove_batches(number, number)? > 0)
    }

    // --- pruning and schema state ---

    /// Pruning watermark, absent before the schema migration.
    pub fn get_pruning_watermark(&self) -> Result<Option<PruningWatermark>, StoreError> {
        self.get_value(keys::PRUNING_WATERMARK_KEY)
    }

    /// Persist the pruning watermark.
    pub fn set_pruning_watermark(&self, watermark: &PruningWatermark) -> Result<(), StoreError> {
        self.put_value(keys::PRUNING_WATERMARK_KEY.to_vec(), watermark)
    }

    /// Stored schema version, [`LEGACY_SCHEMA_VERSION`] when never written.
    pub fn schema_version(&self) -> Result<u32, StoreError> {
        match self.kv.get(keys::SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::MalformedKey(keys::SCHEMA_VERSION_KEY.to_vec()))?;
                Ok(u32::from_be_bytes(bytes))
            }
            None => Ok(LEGACY_SCHEMA_VERSION),
        }
    }

    /// Record the schema version.
    pub fn set_schema_version(&self, version: u32) -> Result<(), StoreError> {
        self.kv.put(keys::SCHEMA_VERSION_KEY.to_vec(), version.to_be_bytes().to_vec())
    }
}
