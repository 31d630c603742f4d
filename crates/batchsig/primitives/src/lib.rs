//! Batchsig primitives
//!
//! Types shared by every batching crate: the batch record and how its
//! identifier is derived, validator-tree and data-result entries, the pruning
//! watermark, secp256k1 helpers, and the interfaces of the collaborators the
//! batching core depends on (staking, slashing, public-key registry).
//!
//! # Batch lifecycle
//!
//! ```text
//! height H     end of block   -> batch N built and persisted
//! height H+1   ExtendVote     -> validators sign batch_id(N)
//! height H+2   Prepare/Process -> signatures injected as tx 0 and verified
//!              PreBlock       -> signatures persisted for batch N
//! ...          end of block   -> batch N pruned once outside the window
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod batch;
pub mod config;
pub mod crypto;
pub mod data_result;
pub mod keepers;
pub mod pruning;

pub use batch::{
    compute_batch_id, data_result_leaf_entry, proving_metadata_hash, Batch, BatchSignatures,
    DomainSeparator, TreeEntries, ValidatorTreeEntry,
};
pub use config::{
    BatchingConfig, BatchingParams, ConfigError, ConsensusParams, Fraction, SlashingParams,
};
pub use crypto::{BatchSigner, CryptoError, ProvingScheme, Secp256k1Signer};
pub use data_result::{DataResult, DataResultKey};
pub use keepers::{PubKeyRegistry, SlashingKeeper, StakingKeeper, ValidatorInfo};
pub use pruning::PruningWatermark;

use thiserror::Error;

/// Operator (staking) address of a validator.
pub type OperatorAddress = alloy_primitives::Address;

/// Consensus address of a validator, as it appears in commit votes.
pub type ConsAddress = alloy_primitives::Address;

/// Number assigned to the first batch ever created.
pub const FIRST_BATCH_NUMBER: u64 = 1;

/// Fixed-point denominator for validator power percentages (1e8 = 100%).
pub const POWER_PERCENT_DENOMINATOR: u64 = 100_000_000;

/// Errors raised by collaborator modules (staking, slashing, key registry).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Requested validator is unknown to the staking module
    #[error("validator {0} not found")]
    ValidatorNotFound(alloy_primitives::Address),

    /// Stored public key could not be decoded
    #[error("invalid public key for {validator}: {reason}")]
    InvalidPublicKey {
        /// Validator owning the key
        validator: OperatorAddress,
        /// Decoding failure
        reason: String,
    },

    /// Anything else the collaborator reports
    #[error("{0}")]
    Other(String),
}
