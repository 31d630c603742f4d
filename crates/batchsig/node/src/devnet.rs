//! In-process validator set driving the full callback pipeline.

use std::sync::Arc;

use alloy_primitives::{keccak256, Bytes, B256};
use batchsig_primitives::{Batch, BatchingConfig, Secp256k1Signer};
use batchsig_store::MemoryStore;
use batchsig_test_utils::{data_result, MockPubKeyRegistry, MockSlashing, MockStaking, TestNet};
use batchsig_vote_ext::{
    encode_extended_commit, vote_extension_sign_bytes, BlockIdFlag, ExtendedCommitInfo, ExtendedVoteInfo, ProposalStatus, Validator,
    VerifyStatus,
};
use tracing::{debug, info};

use crate::{AppError, BatchingApp};

/// A devnet validator's batching module.
pub type DevnetApp =
    BatchingApp<MemoryStore, Arc<MockStaking>, Arc<MockSlashing>, Arc<MockPubKeyRegistry>, Secp256k1Signer>;

/// What happened at one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    /// Block height
    pub height: i64,
    /// Batch created at this height
    pub batch: Option<Batch>,
    /// Signatures each validator stored in PreBlock
    pub signatures_stored: usize,
}

/// Validators with deterministic keys and in-memory stores.
#[derive(Debug)]
pub struct Devnet {
    config: BatchingConfig,
    net: TestNet,
    nodes: Vec<DevnetApp>,
    height: i64,
    last_commit: ExtendedCommitInfo,
    next_result: u64,
}

impl Devnet {
    /// One validator per entry of `powers`, each migrated to the current schema.
    pub fn new(config: BatchingConfig, powers: &[u64]) -> Result<Self, AppError> {
        let net = TestNet::new(powers);
        let nodes = net
            .validators
            .iter()
            .map(|validator| {
                BatchingApp::new(
                    MemoryStore::new(),
                    validator.batch_key().clone(),
                    net.staking.clone(),
                    net.slashing.clone(),
                    net.registry.clone(),
                    &config,
                )
            })
            .collect::<Vec<_>>();
        for node in &nodes {
            node.migrate()?;
        }

        info!(target: "batchsig::devnet", validators = nodes.len(), chain_id = %config.consensus.chain_id, "Started devnet");
        Ok(Self { config, net, nodes, height: 0, last_commit: ExtendedCommitInfo::default(), next_result: 0 })
    }

    /// Last executed height
    pub const fn height(&self) -> i64 {
        self.height
    }

    /// Validator set and collaborators
    pub const fn net(&self) -> &TestNet {
        &self.net
    }

    /// Every validator's app
    pub fn nodes(&self) -> &[DevnetApp] {
        &self.nodes
    }

    /// Validator `index`'s app
    pub fn node(&self, index: usize) -> Option<&DevnetApp> {
        self.nodes.get(index)
    }

    /// Execute the next height with `results` new data results.
    ///
    /// Order: proposal over the previous height's votes, votes on the batch
    /// of the previous height, then PreBlock and EndBlock on every validator.
    pub fn run_block(&mut self, results: usize) -> Result<BlockSummary, AppError> {
        let height = self.height + 1;

        for _ in 0..results {
            self.next_result += 1;
            let result = data_result(self.next_result, height as u64);
            for node in &self.nodes {
                node.post_data_result(&result)?;
            }
        }

        let txs = self.propose(height)?;
        let commit = self.vote(height)?;

        let mut signatures_stored = 0;
        let mut batch = None;
        let prev_commit_hash = commit_hash(&self.last_commit);
        for node in &self.nodes {
            signatures_stored = node.pre_block(height, &txs)?;
            batch = node.end_block(height, prev_commit_hash)?.batch;
        }

        self.last_commit = commit;
        self.height = height;
        debug!(target: "batchsig::devnet", height, batch = ?batch.as_ref().map(|b| b.batch_number), signatures_stored, "Executed block");
        Ok(BlockSummary { height, batch, signatures_stored })
    }

    /// Execute `blocks` heights with `results_per_block` data results each.
    pub fn run(&mut self, blocks: u64, results_per_block: usize) -> Result<Vec<BlockSummary>, AppError> {
        (0..blocks).map(|_| self.run_block(results_per_block)).collect()
    }

    fn propose(&self, height: i64) -> Result<Vec<Bytes>, AppError> {
        if !self.config.consensus.vote_extensions_enabled(height) {
            return Ok(Vec::new());
        }
        let proposer = &self.nodes[height as usize % self.nodes.len()];
        let txs = proposer.prepare_proposal(height, &self.last_commit, self.config.consensus.max_block_bytes, Vec::new())?;

        let last_commit = self.last_commit.to_commit_info();
        for node in &self.nodes {
            if node.process_proposal(height, &txs, &last_commit) == ProposalStatus::Reject {
                return Err(AppError::ProposalRejected(height));
            }
        }
        Ok(txs)
    }

    fn vote(&self, height: i64) -> Result<ExtendedCommitInfo, AppError> {
        let chain_id = &self.config.consensus.chain_id;
        let mut votes = Vec::with_capacity(self.nodes.len());
        // extensions cast at `height` are only consumed by the proposal at `height + 1`
        let extensions_enabled = self.config.consensus.vote_extensions_enabled(height + 1);
        for (node, validator) in self.nodes.iter().zip(&self.net.validators) {
            let extension = if extensions_enabled {
                let extension = node.extend_vote(height)?;
                for peer in &self.nodes {
                    if peer.verify_vote_extension(height, &validator.cons_address(), &extension) ==
                        VerifyStatus::Reject
                    {
                        return Err(AppError::ExtensionRejected { height, validator: validator.cons_address() });
                    }
                }
                extension
            } else {
                Bytes::new()
            };
            let sign_bytes = vote_extension_sign_bytes(&extension, height, 0, chain_id);
            votes.push(ExtendedVoteInfo {
                validator: Validator { address: validator.cons_address(), power: validator.power() },
                extension_signature: validator.sign_consensus(&sign_bytes),
                vote_extension: extension,
                block_id_flag: BlockIdFlag::Commit,
            });
        }

        let mut commit = ExtendedCommitInfo { round: 0, votes };
        commit.sort_votes();
        Ok(commit)
    }
}

fn commit_hash(commit: &ExtendedCommitInfo) -> B256 {
    keccak256(encode_extended_commit(commit))
}
