//! Batchsig vote extensions
//!
//! Batch signatures ride on the consensus engine's vote extensions. Relative
//! to the height `H` a batch was created at:
//!
//! ```text
//! H+1  ExtendVote            sign batch_id(H) with the batch key
//!      VerifyVoteExtension   peers check the signature against batch(H)
//! H+2  PrepareProposal       proposer cross-validates the extended commit
//!                            of H+1 and injects it as tx 0
//!      ProcessProposal       every validator re-runs cross-validation and
//!                            re-verifies each commit vote's batch signature
//!      PreBlock              signatures are persisted for batch(H)
//! ```
//!
//! Cross-validation checks the injected commit against the last commit
//! (round, vote count, order, duplicates, per-vote address/power/flag),
//! verifies each commit vote's consensus-key signature over the canonical
//! vote-extension payload of the previous height, and requires the valid
//! commit votes to carry more than two thirds of the total power.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod abci;
mod canonical;
mod handler;
mod validate;

pub use abci::{
    decode_extended_commit, encode_extended_commit, BlockIdFlag, CommitInfo, ExtendedCommitInfo,
    ExtendedVoteInfo, ProposalStatus, Validator, VerifyStatus, VoteInfo,
};
pub use canonical::{vote_extension_sign_bytes, CanonicalVoteExtension};
pub use handler::VoteExtensionHandler;
pub use validate::{required_voting_power, validate_vote_extensions};

use alloy_primitives::Address;
use batchsig_primitives::{CollaboratorError, ConsAddress, CryptoError, OperatorAddress};
use batchsig_store::StoreError;
use thiserror::Error;

/// Largest accepted vote extension: five 64-byte signature slots.
pub const MAX_VOTE_EXTENSION_LEN: usize = 5 * 64;

/// Vote-extension and proposal errors
#[derive(Debug, Error)]
pub enum VoteExtError {
    /// Storage failure or missing batch
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Staking or key registry failure
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Signing failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Vote extension length outside `1..=320`
    #[error("invalid vote extension length {len} from {validator}")]
    InvalidExtensionLength {
        /// Consensus address of the voter
        validator: ConsAddress,
        /// Extension length
        len: usize,
    },

    /// Non-empty vote extension while there is no batch to sign
    #[error("unexpected vote extension from {validator}: no batch at height {batch_height}")]
    UnexpectedExtension {
        /// Consensus address of the voter
        validator: ConsAddress,
        /// Height the batch would have been created at
        batch_height: i64,
    },

    /// Voter unknown to the staking module
    #[error("unknown validator {0}")]
    UnknownValidator(ConsAddress),

    /// Voter has no registered secp256k1 batch key
    #[error("no secp256k1 key registered for {validator}")]
    MissingBatchKey {
        /// Operator address of the voter
        validator: OperatorAddress,
    },

    /// Batch signature does not verify
    #[error("invalid batch signature from {validator}: {source}")]
    InvalidBatchSignature {
        /// Operator address of the voter
        validator: OperatorAddress,
        /// Verification failure
        source: CryptoError,
    },

    /// Extended commit round differs from the last commit round
    #[error("round mismatch: extended commit {extended}, last commit {last}")]
    RoundMismatch {
        /// Round of the extended commit
        extended: u32,
        /// Round of the last commit
        last: u32,
    },

    /// Extended commit and last commit have different vote counts
    #[error("vote count mismatch: extended commit {extended}, last commit {last}")]
    VoteCountMismatch {
        /// Votes in the extended commit
        extended: usize,
        /// Votes in the last commit
        last: usize,
    },

    /// Votes are not sorted by descending power then ascending address
    #[error("extended commit votes are not sorted at index {index}")]
    VotesNotSorted {
        /// Index of the first out-of-order vote
        index: usize,
    },

    /// The same validator voted twice
    #[error("duplicate vote from {0}")]
    DuplicateVote(Address),

    /// Vote differs from the last commit vote at the same index
    #[error("vote {index} from {validator} does not match the last commit")]
    VoteMismatch {
        /// Vote index
        index: usize,
        /// Consensus address of the voter
        validator: ConsAddress,
    },

    /// A vote that is not a commit vote carries an extension
    #[error("non-commit vote from {0} carries a vote extension")]
    NonCommitExtension(ConsAddress),

    /// Consensus-key signature over the vote extension does not verify
    #[error("invalid vote extension signature from {validator}: {source}")]
    InvalidExtensionSignature {
        /// Consensus address of the voter
        validator: ConsAddress,
        /// Verification failure
        source: CryptoError,
    },

    /// Valid commit votes do not reach the two-thirds threshold
    #[error("insufficient cumulative voting power: got {got}, required {required}")]
    InsufficientVotingPower {
        /// Power of the valid commit votes
        got: u128,
        /// `floor(total * 2 / 3) + 1`
        required: u128,
    },

    /// Proposal lacks the injected extended commit
    #[error("proposal is missing the extended commit transaction")]
    MissingExtendedCommit,

    /// Injected transaction is not a valid extended commit
    #[error("failed to decode extended commit: {0}")]
    Decode(#[from] alloy_rlp::Error),

    /// Injected transaction has bytes after the extended commit
    #[error("{0} trailing bytes after extended commit")]
    TrailingBytes(usize),

    /// Encoded extended commit exceeds the proposal budget
    #[error("extended commit of {size} bytes exceeds max tx bytes {max}")]
    ProposalTooLarge {
        /// Encoded size
        size: u64,
        /// Proposal byte budget
        max: u64,
    },
}

/// Outcome of a failed PreBlock.
///
/// Only backend failures are fatal. Everything else is logged and the block
/// proceeds without storing signatures.
#[derive(Debug, Error)]
pub enum PreBlockError {
    /// Logged and swallowed
    #[error("non-fatal: {0}")]
    NonFatal(VoteExtError),

    /// Propagated to the block executor
    #[error("fatal: {0}")]
    Fatal(#[from] StoreError),
}

impl PreBlockError {
    /// Whether the error must halt block processing
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
