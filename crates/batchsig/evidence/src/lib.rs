//! Batchsig double-sign evidence
//!
//! A validator that signs two different batch ids for the same batch number
//! is slashed, jailed and tombstoned. Evidence is adjudicated against the
//! persisted batch and the validator-tree snapshot of the batch before it:
//!
//! ```text
//! validate_basic ─► claimed id != stored id ─► recovered signer == tree entry (n - 1)
//!                                                   │
//!                        stale? ◄───────────────────┘
//!                          │ no
//!                   tombstoned? ─ no ─► slash, jail, tombstone
//! ```
//!
//! Stale evidence and evidence against tombstoned validators are not
//! punishable and are acknowledged without effect.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod handler;
mod msg;

pub use handler::{BatchDoubleSignSlashed, EvidenceHandler, EvidenceOutcome};
pub use msg::BatchDoubleSign;

use alloy_primitives::{Address, B256};
use batchsig_primitives::{CollaboratorError, CryptoError, OperatorAddress};
use batchsig_store::StoreError;
use thiserror::Error;

/// Evidence rejection reasons
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// Batch number must be above the first batch
    #[error("invalid batch number {0}")]
    InvalidBatchNumber(u64),

    /// Block height must be positive
    #[error("invalid block height {0}")]
    InvalidBlockHeight(i64),

    /// A required hex field is empty
    #[error("empty {0}")]
    EmptyField(&'static str),

    /// A hex field does not decode
    #[error("invalid {field}: {reason}")]
    InvalidHex {
        /// Field name
        field: &'static str,
        /// Decoding failure
        reason: String,
    },

    /// Proving scheme is not the active one
    #[error("unsupported proving scheme index {0}")]
    UnsupportedProvingScheme(u32),

    /// Evidence describes the batch that was actually produced
    #[error("batch IDs are the same: {0}")]
    SameBatchId(B256),

    /// Signature does not recover to the validator's batch key
    #[error("recovered signer does not match {validator}: expected {expected}")]
    SignerMismatch {
        /// Accused validator
        validator: OperatorAddress,
        /// Address in the validator tree
        expected: Address,
        /// Addresses the signature recovers to
        recovered: Vec<Address>,
    },

    /// Signature is malformed or recovers no key
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] CryptoError),

    /// Validator unknown at the batch height
    #[error("validator {operator} not found at height {height}")]
    ValidatorNotFound {
        /// Accused validator
        operator: OperatorAddress,
        /// Height of the batch
        height: i64,
    },

    /// Missing batch or validator tree entry, or storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Staking or slashing failure
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
