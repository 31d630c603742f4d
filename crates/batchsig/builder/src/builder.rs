use alloy_primitives::{Bytes, B256};
use batchsig_merkle::{chain_roots, root_from_entries, MerkleTree};
use batchsig_primitives::{
    compute_batch_id, crypto::eth_address_from_public_key, data_result_leaf_entry,
    proving_metadata_hash, Batch, ProvingScheme, PubKeyRegistry, StakingKeeper, TreeEntries,
    ValidatorTreeEntry, POWER_PERCENT_DENOMINATOR,
};
use batchsig_store::{with_transaction, BatchStore, KvStore, StoreError};
use tracing::{debug, info, trace};

use crate::BatchingError;

/// A batch and the entries its roots were computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltBatch {
    /// Batch record
    pub batch: Batch,
    /// Tree entries
    pub entries: TreeEntries,
}

/// `floor(power * 1e8 / total)`.
pub fn validator_power_percent(power: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let percent = u128::from(power) * u128::from(POWER_PERCENT_DENOMINATOR) / u128::from(total);
    u32::try_from(percent).unwrap_or(u32::MAX)
}

/// Inclusion proof of `dr_id` in a batch's current data-result tree.
pub fn data_result_proof(entries: &TreeEntries, dr_id: &B256) -> Option<Vec<B256>> {
    MerkleTree::from_entries(entries.data_result_entries.iter().map(data_result_leaf_entry))
        .proof_for_entry(&data_result_leaf_entry(dr_id))
}

/// Builds a batch per block from the store, staking set and key registry.
#[derive(Debug, Clone)]
pub struct BatchBuilder<K, R> {
    staking: K,
    registry: R,
}

impl<K, R> BatchBuilder<K, R>
where
    K: StakingKeeper,
    R: PubKeyRegistry,
{
    /// Create a new builder
    pub const fn new(staking: K, registry: R) -> Self {
        Self { staking, registry }
    }

    /// Build, persist and return this block's batch, if one is due.
    ///
    /// Marking results batched and storing the batch happen in one
    /// transaction: on error nothing is written.
    pub fn end_block<S: KvStore>(&self, kv: &S, height: i64) -> Result<Option<Batch>, BatchingError> {
        with_transaction(kv, |tx| {
            let store = BatchStore::new(tx);
            let Some(built) = self.construct_batch(&store, height)? else { return Ok(None) };
            store.set_new_batch(&built.batch, &built.entries)?;

            info!(
                target: "batchsig::builder",
                batch_number = built.batch.batch_number,
                height,
                batch_id = %built.batch.batch_id,
                data_results = built.entries.data_result_entries.len(),
                validators = built.entries.validator_entries.len(),
                "Created batch"
            );
            Ok(Some(built.batch))
        })
    }

    /// Construct the batch for `height`, marking the included data results
    /// batched in `store`. The batch itself is not persisted.
    pub fn construct_batch<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        height: i64,
    ) -> Result<Option<BuiltBatch>, BatchingError> {
        if !self.registry.is_proving_scheme_activated(ProvingScheme::Secp256k1)? {
            trace!(target: "batchsig::builder", height, "Secp256k1 proving scheme not activated");
            return Ok(None);
        }

        let batch_number = store.next_batch_number()?;
        let previous = match store.get_latest_batch() {
            Ok(batch) => Some(batch),
            Err(StoreError::BatchingNotStarted) => None,
            Err(e) => return Err(e.into()),
        };

        let data_result_entries = self.build_data_result_tree(store, batch_number)?;
        let current_data_result_root =
            root_from_entries(data_result_entries.iter().map(data_result_leaf_entry));
        let data_result_root =
            chain_roots(previous.as_ref().map(|b| b.data_result_root), current_data_result_root);

        let validator_entries = self.build_validator_tree()?;
        let validator_root = root_from_entries(validator_entries.iter().map(ValidatorTreeEntry::leaf_entry));

        if data_result_entries.is_empty() &&
            previous.as_ref().is_some_and(|prev| prev.validator_root == validator_root)
        {
            debug!(target: "batchsig::builder", height, "No new data results and validator set unchanged");
            return Ok(None);
        }

        let proving_metadata = Bytes::new();
        let batch_id = compute_batch_id(
            batch_number,
            height,
            validator_root,
            data_result_root,
            proving_metadata_hash(&proving_metadata),
        );

        Ok(Some(BuiltBatch {
            batch: Batch {
                batch_number,
                block_height: height,
                current_data_result_root,
                data_result_root,
                validator_root,
                batch_id,
                proving_metadata,
            },
            entries: TreeEntries { data_result_entries, validator_entries },
        }))
    }

    fn build_data_result_tree<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        batch_number: u64,
    ) -> Result<Vec<B256>, BatchingError> {
        let results = store.get_unbatched_data_results()?;
        let entries: Vec<B256> = results.iter().map(|result| result.dr_id).collect();
        for result in &results {
            store.mark_data_result_batched(result, batch_number)?;
        }
        Ok(entries)
    }

    fn build_validator_tree(&self) -> Result<Vec<ValidatorTreeEntry>, BatchingError> {
        let total_power = self.staking.last_total_power()?;
        let mut entries = Vec::new();
        for (operator, power) in self.staking.last_validator_powers()? {
            let Some(key) = self.registry.validator_key(&operator, ProvingScheme::Secp256k1)? else {
                trace!(target: "batchsig::builder", validator = %operator, "No registered secp256k1 key");
                continue;
            };
            if total_power == 0 {
                return Err(BatchingError::ZeroTotalPower);
            }
            let eth_address = eth_address_from_public_key(&key)
                .map_err(|source| BatchingError::InvalidValidatorKey { validator: operator, source })?;
            entries.push(ValidatorTreeEntry {
                validator_address: operator,
                voting_power_percent: validator_power_percent(power, total_power),
                eth_address,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use batchsig_merkle::verify_proof;
    use batchsig_store::MemoryStore;
    use batchsig_test_utils::{data_result, MockPubKeyRegistry, MockStaking, TestNet};
    use std::sync::Arc;

    fn builder(net: &TestNet) -> BatchBuilder<Arc<MockStaking>, Arc<MockPubKeyRegistry>> {
        BatchBuilder::new(net.staking.clone(), net.registry.clone())
    }

    #[test]
    fn test_power_percent() {
        assert_eq!(validator_power_percent(1, 3), 33_333_333);
        assert_eq!(validator_power_percent(334, 1000), 33_400_000);
        assert_eq!(validator_power_percent(10, 10), 100_000_000);
        assert_eq!(validator_power_percent(u64::MAX, u64::MAX), 100_000_000);
        assert_eq!(validator_power_percent(5, 0), 0);
    }

    #[test]
    fn test_not_activated_skips() {
        let net = TestNet::new(&[10]);
        net.registry.deactivate();
        let kv = MemoryStore::new();
        assert_eq!(builder(&net).end_block(&kv, 1).unwrap(), None);
        assert!(kv.is_empty());
    }

    #[test]
    fn test_first_batch() {
        let net = TestNet::new(&[10, 30]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        store.set_data_result(&data_result(1, 1)).unwrap();

        let batch = builder(&net).end_block(&kv, 5).unwrap().unwrap();
        assert_eq!(batch.batch_number, 1);
        assert_eq!(batch.block_height, 5);
        assert_eq!(batch.batch_id, batch.compute_id());
        assert_eq!(batch.data_result_root, chain_roots(None, batch.current_data_result_root));

        let entries = store.get_tree_entries(1).unwrap();
        assert_eq!(entries.data_result_entries, vec![data_result(1, 1).dr_id]);
        assert_eq!(entries.validator_entries.len(), 2);
        assert_eq!(entries.validator_entries[0].voting_power_percent, 75_000_000);
        assert_eq!(entries.validator_entries[0].eth_address, net.validator(1).eth_address());
        assert!(store.get_unbatched_data_results().unwrap().is_empty());
        assert_eq!(store.get_batch_assignment(&data_result(1, 1).key()).unwrap(), Some(1));
    }

    #[test]
    fn test_noop_when_nothing_changed() {
        let net = TestNet::new(&[10, 30]);
        let kv = MemoryStore::new();
        let builder = builder(&net);

        assert!(builder.end_block(&kv, 1).unwrap().is_some());
        assert_eq!(builder.end_block(&kv, 2).unwrap(), None);
        assert_eq!(BatchStore::new(&kv).next_batch_number().unwrap(), 2);

        net.staking.set_power(&net.validator(0).operator_address(), 20);
        assert_eq!(builder.end_block(&kv, 3).unwrap().unwrap().batch_number, 2);
    }

    #[test]
    fn test_roots_chain_across_batches() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let builder = builder(&net);

        store.set_data_result(&data_result(1, 1)).unwrap();
        let first = builder.end_block(&kv, 1).unwrap().unwrap();
        store.set_data_result(&data_result(2, 2)).unwrap();
        let second = builder.end_block(&kv, 2).unwrap().unwrap();

        assert_eq!(second.data_result_root, chain_roots(Some(first.data_result_root), second.current_data_result_root));
        assert_eq!(second.validator_root, first.validator_root);
    }

    #[test]
    fn test_validator_without_key_skipped() {
        let net = TestNet::new(&[10, 30]);
        net.registry.unregister(&net.validator(0).operator_address());
        let kv = MemoryStore::new();

        builder(&net).end_block(&kv, 1).unwrap();
        let entries = BatchStore::new(&kv).get_tree_entries(1).unwrap();
        assert_eq!(entries.validator_entries.len(), 1);
        assert_eq!(entries.validator_entries[0].validator_address, net.validator(1).operator_address());
        assert_eq!(entries.validator_entries[0].voting_power_percent, 75_000_000);
    }

    #[test]
    fn test_failed_persist_rolls_back_markings() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        builder(&net).end_block(&kv, 1).unwrap();

        store.set_data_result(&data_result(7, 1)).unwrap();
        let err = builder(&net).end_block(&kv, 1).unwrap_err();
        assert_matches!(err, BatchingError::Store(StoreError::DuplicateBatchAtHeight(1)));
        assert_eq!(store.get_unbatched_data_results().unwrap().len(), 1);
        assert_eq!(store.next_batch_number().unwrap(), 2);
    }

    #[test]
    fn test_data_result_proof_against_current_root() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        for seed in 0..5 {
            store.set_data_result(&data_result(seed, 1)).unwrap();
        }
        let batch = builder(&net).end_block(&kv, 1).unwrap().unwrap();
        let entries = store.get_tree_entries(1).unwrap();

        let dr_id = data_result(3, 1).dr_id;
        let proof = data_result_proof(&entries, &dr_id).unwrap();
        assert!(verify_proof(&proof, batch.current_data_result_root, &data_result_leaf_entry(&dr_id)));
        assert!(data_result_proof(&entries, &B256::ZERO).is_none());
    }
}
