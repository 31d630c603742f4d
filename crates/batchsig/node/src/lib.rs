//! Batchsig node wiring
//!
//! [`BatchingApp`] is one validator's view of the batching module: it owns
//! the validator's store and batch-signing key and routes the consensus
//! engine's callbacks to the builder, vote-extension, pruning and evidence
//! components.
//!
//! ```text
//! PrepareProposal(h) / ProcessProposal(h)   extended commit of h-1
//! ExtendVote(h) / VerifyVoteExtension(h)    batch of h-1
//! PreBlock(h)                               signatures for batch of h-2
//! EndBlock(h)                               build batch of h, then prune
//! ```
//!
//! [`Devnet`] runs that pipeline for a set of in-process validators.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod app;
pub mod devnet;

pub use app::{BatchingApp, EndBlockOutcome};
pub use devnet::{BlockSummary, Devnet};

use batchsig_builder::BatchingError;
use batchsig_evidence::EvidenceError;
use batchsig_pruning::PruningError;
use batchsig_store::StoreError;
use batchsig_vote_ext::VoteExtError;
use thiserror::Error;

/// Node errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Batch construction failed
    #[error(transparent)]
    Batching(#[from] BatchingError),

    /// Vote extension or proposal failure
    #[error(transparent)]
    VoteExt(#[from] VoteExtError),

    /// Schema migration failed
    #[error(transparent)]
    Pruning(#[from] PruningError),

    /// Evidence rejected
    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    /// A validator rejected a peer's vote extension
    #[error("vote extension of {validator} rejected at height {height}")]
    ExtensionRejected {
        /// Height of the vote
        height: i64,
        /// Consensus address of the voter
        validator: alloy_primitives::Address,
    },

    /// A validator rejected the proposal
    #[error("proposal rejected at height {0}")]
    ProposalRejected(i64),
}
