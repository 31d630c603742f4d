//! Persistent pruning watermark

use serde::{Deserialize, Serialize};

use crate::{config::BatchingParams, FIRST_BATCH_NUMBER};

/// State the pruning engine carries from block to block.
///
/// Written once by the schema migration and advanced monotonically until
/// `has_pruning_caught_up` flips to `true`; after that only the rolling
/// retention window applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningWatermark {
    /// Number of most recent batches retained
    pub num_batches_to_keep: u64,
    /// Upper bound on batches deleted per block while catching up
    pub max_batch_prune_per_block: u64,
    /// Upper bound on legacy data results deleted per block
    pub max_legacy_result_prune_per_block: u64,
    /// Latest batch number when the schema migration ran
    pub batch_number_at_upgrade: u64,
    /// Whether bulk and legacy pruning have both finished
    pub has_pruning_caught_up: bool,
    /// Lowest batch number bulk pruning has not yet visited
    pub next_bulk_prune_batch: u64,
}

impl PruningWatermark {
    /// Watermark written by the schema migration.
    pub fn at_upgrade(params: &BatchingParams, batch_number_at_upgrade: u64) -> Self {
        Self {
            num_batches_to_keep: params.num_batches_to_keep,
            max_batch_prune_per_block: params.max_batch_prune_per_block,
            max_legacy_result_prune_per_block: params.max_legacy_result_prune_per_block,
            batch_number_at_upgrade,
            has_pruning_caught_up: false,
            next_bulk_prune_batch: FIRST_BATCH_NUMBER,
        }
    }

    /// Oldest batch number outside the retention window, if any.
    pub fn oldest_expired_batch(&self, current_batch_number: u64) -> Option<u64> {
        current_batch_number.checked_sub(self.num_batches_to_keep).filter(|n| *n >= FIRST_BATCH_NUMBER)
    }

    /// Last batch number bulk pruning may touch.
    pub fn bulk_prune_ceiling(&self, current_batch_number: u64) -> Option<u64> {
        self.oldest_expired_batch(current_batch_number)
            .map(|expired| expired.min(self.batch_number_at_upgrade))
    }
}
