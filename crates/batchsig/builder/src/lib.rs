//! Batchsig batch builder
//!
//! Runs at the end of every block once the secp256k1 proving scheme is
//! activated:
//!
//! ```text
//! unbatched results ──► data-result tree ──► current root ─┐
//!                                                          ├─► chained data root ─┐
//! previous batch ──────────────────────► previous root ────┘                     ├─► batch id
//! active validators + keys ──► validator tree ──► validator root ────────────────┘
//! ```
//!
//! No batch is produced when nothing was batched and the validator root is
//! unchanged since the previous batch.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod builder;

pub use builder::{data_result_proof, validator_power_percent, BatchBuilder, BuiltBatch};

use batchsig_primitives::{CollaboratorError, CryptoError, OperatorAddress};
use batchsig_store::StoreError;
use thiserror::Error;

/// Batch construction errors
#[derive(Debug, Error)]
pub enum BatchingError {
    /// Storage failure or invariant violation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Staking or key registry failure
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A registered key could not be decoded
    #[error("invalid batch key of {validator}: {source}")]
    InvalidValidatorKey {
        /// Validator owning the key
        validator: OperatorAddress,
        /// Decoding failure
        source: CryptoError,
    },

    /// Validators are bonded but the recorded total power is zero
    #[error("total voting power is zero")]
    ZeroTotalPower,
}
