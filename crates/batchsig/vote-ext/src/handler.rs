use alloy_primitives::Bytes;
use batchsig_primitives::{
    crypto::verify_batch_signature, Batch, BatchSignatures, BatchSigner, ConsAddress,
    ConsensusParams, ProvingScheme, PubKeyRegistry, StakingKeeper,
};
use batchsig_store::{BatchStore, KvStore};
use tracing::{debug, trace, warn};

use crate::{
    abci::{decode_extended_commit, encode_extended_commit, BlockIdFlag, CommitInfo, ExtendedCommitInfo},
    validate_vote_extensions, PreBlockError, VoteExtError, MAX_VOTE_EXTENSION_LEN,
};

/// Drives the batch-signature phases of the consensus callbacks.
#[derive(Debug, Clone)]
pub struct VoteExtensionHandler<K, R> {
    staking: K,
    registry: R,
    consensus: ConsensusParams,
}

impl<K, R> VoteExtensionHandler<K, R>
where
    K: StakingKeeper,
    R: PubKeyRegistry,
{
    /// Create a new handler
    pub const fn new(staking: K, registry: R, consensus: ConsensusParams) -> Self {
        Self { staking, registry, consensus }
    }

    /// Consensus parameters in use
    pub const fn consensus(&self) -> &ConsensusParams {
        &self.consensus
    }

    /// Sign the batch created at `height - 1`.
    ///
    /// Returns an empty extension when there is no batch to sign.
    pub fn extend_vote<S, Sg>(&self, store: &BatchStore<S>, signer: &Sg, height: i64) -> Result<Bytes, VoteExtError>
    where
        S: KvStore,
        Sg: BatchSigner + ?Sized,
    {
        let batch = match store.get_batch_for_height(height - 1) {
            Ok(batch) => batch,
            Err(e) if e.is_not_found() => {
                trace!(target: "batchsig::vote_ext", height, "No batch to sign");
                return Ok(Bytes::new());
            }
            Err(e) => return Err(e.into()),
        };

        let signature = signer.sign_batch_id(batch.batch_id)?;
        debug!(
            target: "batchsig::vote_ext",
            height,
            batch_number = batch.batch_number,
            batch_id = %batch.batch_id,
            "Signed batch"
        );
        Ok(signature)
    }

    /// Verify a peer's vote extension cast at `height`.
    pub fn verify_vote_extension<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        height: i64,
        validator: &ConsAddress,
        extension: &[u8],
    ) -> Result<(), VoteExtError> {
        let batch = match store.get_batch_for_height(height - 1) {
            Ok(batch) => batch,
            Err(e) if e.is_not_found() => {
                if extension.is_empty() {
                    return Ok(());
                }
                return Err(VoteExtError::UnexpectedExtension { validator: *validator, batch_height: height - 1 });
            }
            Err(e) => return Err(e.into()),
        };
        self.verify_batch_signature(&batch, validator, extension)
    }

    /// Cross-validate the locally collected extended commit and inject it
    /// as transaction 0, filling the rest of `max_tx_bytes` with `txs`.
    pub fn prepare_proposal(
        &self,
        height: i64,
        local_last_commit: &ExtendedCommitInfo,
        max_tx_bytes: u64,
        txs: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, VoteExtError> {
        let mut remaining = max_tx_bytes;
        let mut proposal = Vec::with_capacity(txs.len() + 1);

        if self.consensus.vote_extensions_enabled(height) {
            validate_vote_extensions(
                &self.staking,
                &self.consensus.chain_id,
                height,
                local_last_commit,
                &local_last_commit.to_commit_info(),
            )?;

            let injected = encode_extended_commit(local_last_commit);
            let size = injected.len() as u64;
            if size > remaining {
                return Err(VoteExtError::ProposalTooLarge { size, max: max_tx_bytes });
            }
            remaining -= size;
            proposal.push(injected);
        }

        for tx in txs {
            let size = tx.len() as u64;
            if size > remaining {
                trace!(target: "batchsig::vote_ext", height, size, remaining, "Skipping transaction over budget");
                continue;
            }
            remaining -= size;
            proposal.push(tx);
        }
        Ok(proposal)
    }

    /// Validate the injected extended commit of a proposal at `height`.
    pub fn process_proposal<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        height: i64,
        txs: &[Bytes],
        last_commit: &CommitInfo,
    ) -> Result<(), VoteExtError> {
        if !self.consensus.vote_extensions_enabled(height) {
            return Ok(());
        }

        let extended = decode_extended_commit(txs.first().ok_or(VoteExtError::MissingExtendedCommit)?)?;
        validate_vote_extensions(&self.staking, &self.consensus.chain_id, height, &extended, last_commit)?;

        let batch = match store.get_batch_for_height(height - 2) {
            Ok(batch) => Some(batch),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        for vote in extended.votes.iter().filter(|vote| vote.block_id_flag == BlockIdFlag::Commit) {
            match &batch {
                Some(batch) => self.verify_batch_signature(batch, &vote.validator.address, &vote.vote_extension)?,
                None if vote.vote_extension.is_empty() => {}
                None => {
                    return Err(VoteExtError::UnexpectedExtension {
                        validator: vote.validator.address,
                        batch_height: height - 2,
                    })
                }
            }
        }
        Ok(())
    }

    /// Persist the batch signatures carried by the injected extended commit.
    ///
    /// Returns the number of signatures stored.
    pub fn pre_block<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        height: i64,
        txs: &[Bytes],
    ) -> Result<usize, PreBlockError> {
        if !self.consensus.vote_extensions_enabled(height) {
            return Ok(0);
        }

        let tx = txs.first().ok_or(PreBlockError::NonFatal(VoteExtError::MissingExtendedCommit))?;
        let extended = decode_extended_commit(tx).map_err(PreBlockError::NonFatal)?;
        let batch = store.get_batch_for_height(height - 2).map_err(|e| {
            if e.is_not_found() { PreBlockError::NonFatal(e.into()) } else { PreBlockError::Fatal(e) }
        })?;

        let mut stored = 0;
        for vote in extended.votes.iter().filter(|vote| vote.block_id_flag == BlockIdFlag::Commit) {
            if vote.vote_extension.is_empty() {
                continue;
            }
            let info = match self.staking.validator_by_cons_addr(&vote.validator.address) {
                Ok(Some(info)) => info,
                Ok(None) => {
                    warn!(target: "batchsig::vote_ext", validator = %vote.validator.address, "Unknown validator in extended commit");
                    continue;
                }
                Err(e) => {
                    warn!(target: "batchsig::vote_ext", validator = %vote.validator.address, error = %e, "Failed to resolve validator");
                    continue;
                }
            };

            let signatures = BatchSignatures {
                validator_address: info.operator_address,
                voting_power: vote.validator.power,
                signatures: vote.vote_extension.clone(),
            };
            store.set_batch_signature(batch.batch_number, &signatures).map_err(PreBlockError::Fatal)?;
            stored += 1;
        }

        debug!(target: "batchsig::vote_ext", height, batch_number = batch.batch_number, stored, "Stored batch signatures");
        Ok(stored)
    }

    /// Transactions left for execution once the injected commit is stripped.
    pub fn strip_extended_commit<'a>(&self, height: i64, txs: &'a [Bytes]) -> &'a [Bytes] {
        if self.consensus.vote_extensions_enabled(height) { txs.get(1..).unwrap_or_default() } else { txs }
    }

    fn verify_batch_signature(
        &self,
        batch: &Batch,
        validator: &ConsAddress,
        extension: &[u8],
    ) -> Result<(), VoteExtError> {
        if extension.is_empty() || extension.len() > MAX_VOTE_EXTENSION_LEN {
            return Err(VoteExtError::InvalidExtensionLength { validator: *validator, len: extension.len() });
        }

        let info =
            self.staking.validator_by_cons_addr(validator)?.ok_or(VoteExtError::UnknownValidator(*validator))?;
        let key = self
            .registry
            .validator_key(&info.operator_address, ProvingScheme::Secp256k1)?
            .ok_or(VoteExtError::MissingBatchKey { validator: info.operator_address })?;

        verify_batch_signature(&key, batch.batch_id, extension)
            .map_err(|source| VoteExtError::InvalidBatchSignature { validator: info.operator_address, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{abci::Validator, vote_extension_sign_bytes, ExtendedVoteInfo};
    use alloy_primitives::B256;
    use assert_matches::assert_matches;
    use batchsig_primitives::{compute_batch_id, TreeEntries};
    use batchsig_store::{MemoryStore, StoreError};
    use batchsig_test_utils::{MockPubKeyRegistry, MockStaking, TestNet, TestValidator};
    use std::sync::Arc;

    const CHAIN_ID: &str = "batchsig-test";
    const BATCH_HEIGHT: i64 = 10;

    type Handler = VoteExtensionHandler<Arc<MockStaking>, Arc<MockPubKeyRegistry>>;

    fn handler(net: &TestNet) -> Handler {
        let consensus = ConsensusParams {
            chain_id: CHAIN_ID.to_string(),
            vote_extensions_enable_height: 1,
            ..Default::default()
        };
        VoteExtensionHandler::new(net.staking.clone(), net.registry.clone(), consensus)
    }

    fn store_batch(kv: &MemoryStore, height: i64) -> Batch {
        let store = BatchStore::new(kv);
        let batch_number = store.next_batch_number().unwrap();
        let validator_root = B256::repeat_byte(0x11);
        let data_result_root = B256::repeat_byte(0x22);
        let batch = Batch {
            batch_number,
            block_height: height,
            current_data_result_root: data_result_root,
            data_result_root,
            validator_root,
            batch_id: compute_batch_id(batch_number, height, validator_root, data_result_root, B256::ZERO),
            proving_metadata: Bytes::new(),
        };
        store.set_new_batch(&batch, &TreeEntries::default()).unwrap();
        batch
    }

    fn signed_vote(validator: &TestValidator, extension: Bytes, height: i64) -> ExtendedVoteInfo {
        let sign_bytes = vote_extension_sign_bytes(&extension, height, 0, CHAIN_ID);
        ExtendedVoteInfo {
            validator: Validator { address: validator.cons_address(), power: validator.power() },
            extension_signature: validator.sign_consensus(&sign_bytes),
            vote_extension: extension,
            block_id_flag: BlockIdFlag::Commit,
        }
    }

    /// Every validator extends its vote at `BATCH_HEIGHT + 1`.
    fn collect_votes(net: &TestNet, handler: &Handler, kv: &MemoryStore) -> ExtendedCommitInfo {
        let store = BatchStore::new(kv);
        let vote_height = BATCH_HEIGHT + 1;
        let votes = net
            .validators
            .iter()
            .map(|v| signed_vote(v, handler.extend_vote(&store, v.batch_key(), vote_height).unwrap(), vote_height))
            .collect();
        let mut commit = ExtendedCommitInfo { round: 0, votes };
        commit.sort_votes();
        commit
    }

    #[test]
    fn test_extend_and_verify() {
        let net = TestNet::new(&[10, 20, 30]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        let batch = store_batch(&kv, BATCH_HEIGHT);

        let signer = net.validator(0);
        let extension = handler.extend_vote(&store, signer.batch_key(), BATCH_HEIGHT + 1).unwrap();
        assert_eq!(extension, signer.sign_batch(batch.batch_id).unwrap());

        handler.verify_vote_extension(&store, BATCH_HEIGHT + 1, &signer.cons_address(), &extension).unwrap();
        assert_matches!(
            handler.verify_vote_extension(&store, BATCH_HEIGHT + 1, &net.validator(1).cons_address(), &extension),
            Err(VoteExtError::InvalidBatchSignature { .. })
        );
    }

    #[test]
    fn test_no_batch_means_empty_extension() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        let validator = net.validator(0);

        let extension = handler.extend_vote(&store, validator.batch_key(), 5).unwrap();
        assert!(extension.is_empty());
        handler.verify_vote_extension(&store, 5, &validator.cons_address(), &extension).unwrap();
        assert_matches!(
            handler.verify_vote_extension(&store, 5, &validator.cons_address(), &[1; 64]),
            Err(VoteExtError::UnexpectedExtension { batch_height: 4, .. })
        );
    }

    #[test]
    fn test_extension_length_bounds() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        store_batch(&kv, BATCH_HEIGHT);
        let cons = net.validator(0).cons_address();

        for len in [0, MAX_VOTE_EXTENSION_LEN + 1] {
            assert_matches!(
                handler.verify_vote_extension(&store, BATCH_HEIGHT + 1, &cons, &vec![1; len]),
                Err(VoteExtError::InvalidExtensionLength { .. })
            );
        }
    }

    #[test]
    fn test_extension_with_reserved_slots_accepted() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        let batch = store_batch(&kv, BATCH_HEIGHT);
        let validator = net.validator(0);

        let mut extension = validator.sign_batch(batch.batch_id).unwrap().to_vec();
        extension.resize(MAX_VOTE_EXTENSION_LEN, 0);
        handler.verify_vote_extension(&store, BATCH_HEIGHT + 1, &validator.cons_address(), &extension).unwrap();
    }

    #[test]
    fn test_missing_batch_key() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        let batch = store_batch(&kv, BATCH_HEIGHT);
        let validator = net.validator(0);
        net.registry.unregister(&validator.operator_address());

        let extension = validator.sign_batch(batch.batch_id).unwrap();
        assert_matches!(
            handler.verify_vote_extension(&store, BATCH_HEIGHT + 1, &validator.cons_address(), &extension),
            Err(VoteExtError::MissingBatchKey { .. })
        );
    }

    #[test]
    fn test_full_collection_cycle() {
        let net = TestNet::new(&[10, 20, 30]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        let batch = store_batch(&kv, BATCH_HEIGHT);
        let commit = collect_votes(&net, &handler, &kv);
        let height = BATCH_HEIGHT + 2;

        let user_tx = Bytes::from_static(b"user tx");
        let proposal = handler.prepare_proposal(height, &commit, 1 << 20, vec![user_tx.clone()]).unwrap();
        assert_eq!(proposal.len(), 2);
        assert_eq!(proposal[1], user_tx);
        assert_eq!(handler.strip_extended_commit(height, &proposal), &[user_tx]);

        handler.process_proposal(&store, height, &proposal, &commit.to_commit_info()).unwrap();
        assert_eq!(handler.pre_block(&store, height, &proposal).unwrap(), 3);

        let signatures = store.get_signatures_for_batch(batch.batch_number).unwrap();
        assert_eq!(signatures.len(), 3);
        for validator in &net.validators {
            let stored = store.get_batch_signature(batch.batch_number, &validator.operator_address()).unwrap().unwrap();
            assert_eq!(stored.voting_power, validator.power());
            assert_eq!(stored.signatures, validator.sign_batch(batch.batch_id).unwrap());
        }
    }

    #[test]
    fn test_prepare_proposal_budget() {
        let net = TestNet::new(&[10, 20, 30]);
        let kv = MemoryStore::new();
        let handler = handler(&net);
        store_batch(&kv, BATCH_HEIGHT);
        let commit = collect_votes(&net, &handler, &kv);
        let injected = encode_extended_commit(&commit).len() as u64;

        assert_matches!(
            handler.prepare_proposal(BATCH_HEIGHT + 2, &commit, injected - 1, vec![]),
            Err(VoteExtError::ProposalTooLarge { .. })
        );

        let txs = vec![Bytes::from(vec![1; 8]), Bytes::from(vec![2; 4]), Bytes::from(vec![3; 2])];
        let proposal = handler.prepare_proposal(BATCH_HEIGHT + 2, &commit, injected + 6, txs).unwrap();
        assert_eq!(proposal.len(), 3);
        assert_eq!(proposal[1].len(), 4);
        assert_eq!(proposal[2].len(), 2);
    }

    #[test]
    fn test_disabled_extensions_pass_through() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let mut handler = handler(&net);
        handler.consensus.vote_extensions_enable_height = 0;

        let txs = vec![Bytes::from_static(b"tx")];
        let proposal = handler.prepare_proposal(5, &ExtendedCommitInfo::default(), 100, txs.clone()).unwrap();
        assert_eq!(proposal, txs);
        handler.process_proposal(&store, 5, &proposal, &CommitInfo::default()).unwrap();
        assert_eq!(handler.pre_block(&store, 5, &proposal).unwrap(), 0);
        assert_eq!(handler.strip_extended_commit(5, &proposal), txs.as_slice());
    }

    #[test]
    fn test_process_proposal_rejects_bad_batch_signature() {
        let net = TestNet::new(&[10, 20, 30]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);
        store_batch(&kv, BATCH_HEIGHT);

        let vote_height = BATCH_HEIGHT + 1;
        let mut commit = collect_votes(&net, &handler, &kv);
        let forged = net.validator(0).sign_batch(B256::repeat_byte(0xab)).unwrap();
        let index = commit.votes.iter().position(|v| v.validator.address == net.validator(0).cons_address()).unwrap();
        commit.votes[index] = signed_vote(net.validator(0), forged, vote_height);

        let proposal = vec![encode_extended_commit(&commit)];
        assert_matches!(
            handler.process_proposal(&store, BATCH_HEIGHT + 2, &proposal, &commit.to_commit_info()),
            Err(VoteExtError::InvalidBatchSignature { .. })
        );
    }

    #[test]
    fn test_process_proposal_requires_injected_commit() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);

        assert_matches!(
            handler.process_proposal(&store, 5, &[], &CommitInfo::default()),
            Err(VoteExtError::MissingExtendedCommit)
        );
        assert_matches!(
            handler.process_proposal(&store, 5, &[Bytes::from_static(b"junk")], &CommitInfo::default()),
            Err(VoteExtError::Decode(_))
        );
    }

    #[test]
    fn test_pre_block_without_batch_is_non_fatal() {
        let net = TestNet::new(&[10]);
        let kv = MemoryStore::new();
        let store = BatchStore::new(&kv);
        let handler = handler(&net);

        let err = handler.pre_block(&store, 5, &[]).unwrap_err();
        assert!(!err.is_fatal());

        let proposal = vec![encode_extended_commit(&ExtendedCommitInfo::default())];
        let err = handler.pre_block(&store, 5, &proposal).unwrap_err();
        assert_matches!(err, PreBlockError::NonFatal(VoteExtError::Store(StoreError::NotFound(_))));
    }
}
