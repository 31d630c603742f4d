//! Batchsig storage
//!
//! The batching core persists everything through [`KvStore`], an ordered
//! byte-keyed map with bounded range scans and range deletion. Two backends
//! ship here:
//!
//! - [`MemoryStore`]: a `BTreeMap` behind a lock, used by tests and the devnet
//! - [`Overlay`]: buffers writes over another store and applies them in one
//!   `write_batch` on commit, giving each block phase an atomic unit
//!
//! [`BatchStore`] lays the batching collections out on top of a [`KvStore`]:
//!
//! ```text
//! 0x01 ‖ number                       -> Batch
//! 0x02 ‖ height                       -> number
//! 0x03                                -> next batch number
//! 0x04 ‖ number                       -> TreeEntries
//! 0x05 ‖ number ‖ operator            -> ValidatorTreeEntry
//! 0x06 ‖ number ‖ operator            -> BatchSignatures
//! 0x07 ‖ batched ‖ dr_id ‖ dr_height  -> DataResult
//! 0x08 ‖ dr_id ‖ dr_height            -> number
//! 0x09 ‖ number ‖ dr_id ‖ dr_height   -> ()
//! 0x0a ‖ dr_id ‖ dr_height            -> DataResult (legacy schema)
//! 0x0b                                -> PruningWatermark
//! 0x0f                                -> schema version
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod batch_store;
pub mod keys;
mod kv;
mod overlay;
mod queries;

pub use batch_store::{BatchStore, CURRENT_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION};
pub use kv::{KvPair, KvStore, MemoryStore, Order, WriteOp};
pub use overlay::{with_transaction, Overlay};
pub use queries::{
    BatchQuery, BatchResponse, BatchesResponse, DataResultResponse, PageRequest, DEFAULT_PAGE_LIMIT,
};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested record does not exist (or has been pruned)
    #[error("{0} not found")]
    NotFound(String),

    /// No batch has been created yet
    #[error("batching has not started")]
    BatchingNotStarted,

    /// A batch is already recorded for the height
    #[error("batch already exists at height {0}")]
    DuplicateBatchAtHeight(i64),

    /// Batch number does not continue the sequence
    #[error("batch number mismatch: expected {expected}, got {got}")]
    BatchNumberMismatch {
        /// Next number in the sequence
        expected: u64,
        /// Number carried by the batch
        got: u64,
    },

    /// Stored key does not have the expected layout
    #[error("malformed key {0:02x?}")]
    MalformedKey(Vec<u8>),

    /// Value (de)serialization failed
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this is a missing-data condition rather than a failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BatchingNotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_kinds() {
        assert!(StoreError::NotFound("batch 3".into()).is_not_found());
        assert!(StoreError::BatchingNotStarted.is_not_found());
        assert!(!StoreError::DuplicateBatchAtHeight(5).is_not_found());
        assert!(!StoreError::Backend("disk".into()).is_not_found());
    }
}
