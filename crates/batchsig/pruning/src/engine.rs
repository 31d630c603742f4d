use alloy_primitives::B256;
use batchsig_primitives::{BatchingParams, PruningWatermark};
use batchsig_store::{with_transaction, BatchStore, KvStore, Order, StoreError};
use tracing::{debug, info, trace};

use crate::PruningError;

/// What one pruning pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Batch removed by the retention window
    pub expired_batch: Option<u64>,
    /// Batches removed by bulk pruning
    pub bulk_removed: usize,
    /// Legacy data results removed
    pub legacy_removed: usize,
    /// Whether bulk and legacy pruning have finished
    pub caught_up: bool,
}

/// Removes batching state that fell out of the retention window.
#[derive(Debug, Clone, Default)]
pub struct PruningEngine {
    params: BatchingParams,
}

impl PruningEngine {
    /// Create a new engine. `params` seed the watermark at migration time.
    pub const fn new(params: BatchingParams) -> Self {
        Self { params }
    }

    /// Parameters written into the watermark by the migration
    pub const fn params(&self) -> &BatchingParams {
        &self.params
    }

    /// Run one pruning pass in its own transaction.
    pub fn end_block<S: KvStore>(
        &self,
        kv: &S,
        height: i64,
        prev_commit_hash: B256,
    ) -> Result<PruneReport, PruningError> {
        with_transaction(kv, |tx| self.prune(&BatchStore::new(tx), height, prev_commit_hash))
    }

    /// Run one pruning pass against `store`.
    ///
    /// `prev_commit_hash` seeds where the legacy walk starts.
    pub fn prune<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        height: i64,
        prev_commit_hash: B256,
    ) -> Result<PruneReport, PruningError> {
        let mut report = PruneReport::default();
        let Some(mut watermark) = store.get_pruning_watermark()? else {
            trace!(target: "batchsig::pruning", height, "No pruning watermark, schema not migrated");
            return Ok(report);
        };
        let current = match store.current_batch_number() {
            Ok(number) => number,
            Err(StoreError::BatchingNotStarted) => {
                report.caught_up = watermark.has_pruning_caught_up;
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(expired) = watermark.oldest_expired_batch(current) {
            if prune_batch_with(store, watermark.batch_number_at_upgrade, expired)? {
                report.expired_batch = Some(expired);
            }
        }

        if !watermark.has_pruning_caught_up {
            let (removed, bulk_done) = Self::bulk_prune(store, &mut watermark, current)?;
            report.bulk_removed = removed;

            if bulk_done {
                report.legacy_removed = Self::prune_legacy(store, &watermark, height, prev_commit_hash)?;
                if !store.has_legacy_data_results()? {
                    watermark.has_pruning_caught_up = true;
                    info!(
                        target: "batchsig::pruning",
                        height,
                        batch_number_at_upgrade = watermark.batch_number_at_upgrade,
                        "Pruning caught up"
                    );
                }
            }
            store.set_pruning_watermark(&watermark)?;
        }

        report.caught_up = watermark.has_pruning_caught_up;
        Ok(report)
    }

    /// Remove one batch and, if it was built after the migration, the data
    /// results assigned to it.
    pub fn prune_batch<S: KvStore>(&self, store: &BatchStore<S>, number: u64) -> Result<bool, PruningError> {
        let at_upgrade = store.get_pruning_watermark()?.map_or(u64::MAX, |w| w.batch_number_at_upgrade);
        prune_batch_with(store, at_upgrade, number)
    }

    /// Remove up to `max_batch_prune_per_block` batches starting at the
    /// watermark, never past `batch_number_at_upgrade` or the retention
    /// window.
    ///
    /// Advances the watermark in place. Returns the number of batches removed
    /// and whether every batch up to `batch_number_at_upgrade` is gone, which
    /// is when the legacy data results assigned to them may be pruned.
    pub fn bulk_prune<S: KvStore>(
        store: &BatchStore<S>,
        watermark: &mut PruningWatermark,
        current_batch_number: u64,
    ) -> Result<(usize, bool), PruningError> {
        let mut removed = 0;
        if let Some(ceiling) = watermark.bulk_prune_ceiling(current_batch_number) {
            let first = watermark.next_bulk_prune_batch;
            if first <= ceiling && watermark.max_batch_prune_per_block > 0 {
                let last = first.saturating_add(watermark.max_batch_prune_per_block - 1).min(ceiling);
                removed = store.remove_batches(first, last)?;
                watermark.next_bulk_prune_batch = last + 1;
                debug!(target: "batchsig::pruning", first, last, removed, ceiling, "Bulk pruned batches");
            }
        }
        Ok((removed, watermark.next_bulk_prune_batch > watermark.batch_number_at_upgrade))
    }

    /// Remove up to `max_legacy_result_prune_per_block` legacy data results.
    ///
    /// The walk starts at `prev_commit_hash` and runs ascending on even
    /// heights and descending on odd ones.
    fn prune_legacy<S: KvStore>(
        store: &BatchStore<S>,
        watermark: &PruningWatermark,
        height: i64,
        prev_commit_hash: B256,
    ) -> Result<usize, PruningError> {
        let limit = usize::try_from(watermark.max_legacy_result_prune_per_block).unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(0);
        }
        let order = if height % 2 == 0 { Order::Ascending } else { Order::Descending };

        let keys = store.legacy_data_result_keys_from(prev_commit_hash.as_slice(), order, limit)?;
        for dr in &keys {
            store.remove_legacy_data_result(dr)?;
        }

        if !keys.is_empty() {
            debug!(target: "batchsig::pruning", height, ?order, removed = keys.len(), "Pruned legacy data results");
        }
        Ok(keys.len())
    }
}

fn prune_batch_with<S: KvStore>(store: &BatchStore<S>, at_upgrade: u64, number: u64) -> Result<bool, PruningError> {
    if number > at_upgrade {
        let results = store.remove_data_results_for_batch(number)?;
        trace!(target: "batchsig::pruning", batch_number = number, results, "Removed batch data results");
    } else {
        debug!(
            target: "batchsig::pruning",
            batch_number = number,
            at_upgrade,
            "Batch predates the schema migration, data results left to legacy pruning"
        );
    }

    let removed = store.remove_batch(number)?;
    if removed {
        debug!(target: "batchsig::pruning", batch_number = number, "Pruned batch");
    }
    Ok(removed)
}
