//! Batchsig pruning
//!
//! Runs after batch construction at the end of every block once the schema
//! migration has written a [`PruningWatermark`]:
//!
//! ```text
//! migration ──► catching-up ─────────────────────────────► caught-up
//!               basic: oldest expired batch                basic only
//!               bulk:  up to N batches <= batch_at_upgrade
//!               legacy (after bulk): up to M legacy results
//! ```
//!
//! Every pass runs inside one store transaction. A failed pass writes
//! nothing and is retried on the next block.
//!
//! [`PruningWatermark`]: batchsig_primitives::PruningWatermark

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod engine;
mod migration;

pub use engine::{PruneReport, PruningEngine};
pub use migration::MigrationOutcome;

use batchsig_store::StoreError;
use thiserror::Error;

/// Pruning and migration errors
#[derive(Debug, Error)]
pub enum PruningError {
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored schema is newer than this binary understands
    #[error("unsupported schema version {found}, latest known is {latest}")]
    UnsupportedSchema {
        /// Version found in the store
        found: u32,
        /// Latest version this binary migrates to
        latest: u32,
    },
}
