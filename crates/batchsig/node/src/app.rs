use alloy_primitives::{Bytes, B256};
use batchsig_builder::BatchBuilder;
use batchsig_evidence::{BatchDoubleSign, EvidenceHandler, EvidenceOutcome};
use batchsig_primitives::{
    Batch, BatchSigner, BatchingConfig, ConsAddress, DataResult, PubKeyRegistry, SlashingKeeper,
    StakingKeeper,
};
use batchsig_pruning::{MigrationOutcome, PruneReport, PruningEngine};
use batchsig_store::{with_transaction, BatchStore, KvStore};
use batchsig_vote_ext::{
    CommitInfo, ExtendedCommitInfo, PreBlockError, ProposalStatus, VerifyStatus, VoteExtensionHandler,
};
use tracing::{error, info, warn};

use crate::AppError;

/// What EndBlock produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndBlockOutcome {
    /// Batch created this block
    pub batch: Option<Batch>,
    /// Pruning pass result, `None` when the pass failed
    pub pruning: Option<PruneReport>,
}

/// One validator's batching module.
#[derive(Debug)]
pub struct BatchingApp<S, K, Sl, R, Sg> {
    store: S,
    signer: Sg,
    builder: BatchBuilder<K, R>,
    vote_ext: VoteExtensionHandler<K, R>,
    pruning: PruningEngine,
    evidence: EvidenceHandler<K, Sl>,
}

impl<S, K, Sl, R, Sg> BatchingApp<S, K, Sl, R, Sg>
where
    S: KvStore,
    K: StakingKeeper + Clone,
    Sl: SlashingKeeper,
    R: PubKeyRegistry + Clone,
    Sg: BatchSigner,
{
    /// Wire the batching components over `store`.
    pub fn new(store: S, signer: Sg, staking: K, slashing: Sl, registry: R, config: &BatchingConfig) -> Self {
        Self {
            store,
            signer,
            builder: BatchBuilder::new(staking.clone(), registry.clone()),
            vote_ext: VoteExtensionHandler::new(staking.clone(), registry, config.consensus.clone()),
            pruning: PruningEngine::new(config.batching.clone()),
            evidence: EvidenceHandler::new(
                staking,
                slashing,
                config.consensus.clone(),
                config.slashing.clone(),
            ),
        }
    }

    /// Typed view of the underlying store
    pub const fn store(&self) -> BatchStore<&S> {
        BatchStore::new(&self.store)
    }

    /// Public key of the batch-signing key
    pub fn batch_public_key(&self) -> Bytes {
        self.signer.public_key()
    }

    /// Record a finalized data result for the next batch.
    pub fn post_data_result(&self, result: &DataResult) -> Result<(), AppError> {
        Ok(self.store().set_data_result(result)?)
    }

    /// Run the schema migration.
    pub fn migrate(&self) -> Result<MigrationOutcome, AppError> {
        Ok(self.pruning.migrate(&self.store)?)
    }

    /// ExtendVote
    pub fn extend_vote(&self, height: i64) -> Result<Bytes, AppError> {
        Ok(self.vote_ext.extend_vote(&self.store(), &self.signer, height)?)
    }

    /// VerifyVoteExtension
    pub fn verify_vote_extension(&self, height: i64, validator: &ConsAddress, extension: &[u8]) -> VerifyStatus {
        match self.vote_ext.verify_vote_extension(&self.store(), height, validator, extension) {
            Ok(()) => VerifyStatus::Accept,
            Err(e) => {
                warn!(target: "batchsig::node", height, %validator, error = %e, "Rejected vote extension");
                VerifyStatus::Reject
            }
        }
    }

    /// PrepareProposal
    pub fn prepare_proposal(
        &self,
        height: i64,
        local_last_commit: &ExtendedCommitInfo,
        max_tx_bytes: u64,
        txs: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, AppError> {
        self.vote_ext.prepare_proposal(height, local_last_commit, max_tx_bytes, txs).map_err(|e| {
            error!(target: "batchsig::node", height, error = %e, "Failed to prepare proposal");
            e.into()
        })
    }

    /// ProcessProposal
    pub fn process_proposal(&self, height: i64, txs: &[Bytes], last_commit: &CommitInfo) -> ProposalStatus {
        match self.vote_ext.process_proposal(&self.store(), height, txs, last_commit) {
            Ok(()) => ProposalStatus::Accept,
            Err(e) => {
                warn!(target: "batchsig::node", height, error = %e, "Rejected proposal");
                ProposalStatus::Reject
            }
        }
    }

    /// PreBlock. Only storage failures are returned.
    pub fn pre_block(&self, height: i64, txs: &[Bytes]) -> Result<usize, AppError> {
        match with_transaction(&self.store, |tx| self.vote_ext.pre_block(&BatchStore::new(tx), height, txs)) {
            Ok(stored) => Ok(stored),
            Err(PreBlockError::NonFatal(e)) => {
                warn!(target: "batchsig::node", height, error = %e, "Skipped batch signature collection");
                Ok(0)
            }
            Err(PreBlockError::Fatal(e)) => {
                error!(target: "batchsig::node", height, error = %e, "Failed to store batch signatures");
                Err(e.into())
            }
        }
    }

    /// Transactions left for execution after PreBlock.
    pub fn strip_injected_tx<'a>(&self, height: i64, txs: &'a [Bytes]) -> &'a [Bytes] {
        self.vote_ext.strip_extended_commit(height, txs)
    }

    /// EndBlock: build this block's batch, then prune.
    ///
    /// A failed pruning pass is logged and retried next block.
    pub fn end_block(&self, height: i64, prev_commit_hash: B256) -> Result<EndBlockOutcome, AppError> {
        let batch = self.builder.end_block(&self.store, height)?;
        let pruning = match self.pruning.end_block(&self.store, height, prev_commit_hash) {
            Ok(report) => Some(report),
            Err(e) => {
                error!(target: "batchsig::node", height, error = %e, "Pruning pass failed");
                None
            }
        };
        Ok(EndBlockOutcome { batch, pruning })
    }

    /// Adjudicate double-sign evidence submitted at `current_height`.
    pub fn submit_double_sign_evidence(
        &self,
        current_height: i64,
        evidence: &BatchDoubleSign,
    ) -> Result<EvidenceOutcome, AppError> {
        let outcome = self.evidence.handle_double_sign(&self.store(), current_height, evidence)?;
        info!(target: "batchsig::node", current_height, ?outcome, "Processed double-sign evidence");
        Ok(outcome)
    }
}
