//! Finalized off-chain computation results awaiting or carrying a batch

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

/// Identifies a data result: request id plus the height the request was posted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataResultKey {
    /// Data request id
    pub dr_id: B256,
    /// Height the data request was posted at
    pub dr_block_height: u64,
}

impl DataResultKey {
    /// Create a new key
    pub const fn new(dr_id: B256, dr_block_height: u64) -> Self {
        Self { dr_id, dr_block_height }
    }
}

/// Result of a data request, as produced by the execution pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResult {
    /// Data request id, the raw identifier committed in the data-result tree
    pub dr_id: B256,
    /// Height the data request was posted at
    pub dr_block_height: u64,
    /// Height the result was finalized at
    pub block_height: u64,
    /// Exit code of the execution
    pub exit_code: u32,
    /// Gas consumed
    pub gas_used: u64,
    /// Result payload
    pub result: Bytes,
    /// Whether executors reached consensus on the result
    pub consensus: bool,
    /// Whether the result has been included in a batch
    pub batched: bool,
}

impl DataResult {
    /// Key under which this result is stored
    pub const fn key(&self) -> DataResultKey {
        DataResultKey::new(self.dr_id, self.dr_block_height)
    }
}
