use batchsig_primitives::PruningWatermark;
use batchsig_store::{with_transaction, BatchStore, KvStore, StoreError, CURRENT_SCHEMA_VERSION};
use tracing::{debug, info};

use crate::{PruningEngine, PruningError};

/// Result of [`PruningEngine::migrate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Store already on the current schema
    AlreadyCurrent,
    /// Store migrated
    Migrated {
        /// Latest batch number when the migration ran, 0 before the first batch
        batch_number_at_upgrade: u64,
        /// Unbatched legacy results moved into the current collection
        moved_results: usize,
    },
}

impl PruningEngine {
    /// Migrate the store to the current schema in one transaction.
    pub fn migrate<S: KvStore>(&self, kv: &S) -> Result<MigrationOutcome, PruningError> {
        with_transaction(kv, |tx| self.migrate_to_current_schema(&BatchStore::new(tx)))
    }

    /// Write the pruning watermark and hand unbatched legacy results to the
    /// batch builder. Re-running on a migrated store is a no-op.
    pub fn migrate_to_current_schema<S: KvStore>(
        &self,
        store: &BatchStore<S>,
    ) -> Result<MigrationOutcome, PruningError> {
        let version = store.schema_version()?;
        if version == CURRENT_SCHEMA_VERSION {
            return Ok(MigrationOutcome::AlreadyCurrent);
        }
        if version > CURRENT_SCHEMA_VERSION {
            return Err(PruningError::UnsupportedSchema { found: version, latest: CURRENT_SCHEMA_VERSION });
        }

        let batch_number_at_upgrade = match store.current_batch_number() {
            Ok(number) => number,
            Err(StoreError::BatchingNotStarted) => 0,
            Err(e) => return Err(e.into()),
        };
        store.set_pruning_watermark(&PruningWatermark::at_upgrade(self.params(), batch_number_at_upgrade))?;

        let mut moved_results = 0;
        for result in store.get_legacy_data_results()? {
            let dr = result.key();
            if result.batched || store.get_batch_assignment(&dr)?.is_some() {
                continue;
            }
            store.set_data_result(&result)?;
            store.remove_legacy_data_result(&dr)?;
            debug!(target: "batchsig::pruning", dr_id = %dr.dr_id, dr_block_height = dr.dr_block_height, "Moved unbatched legacy result");
            moved_results += 1;
        }

        store.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        info!(
            target: "batchsig::pruning",
            from = version,
            to = CURRENT_SCHEMA_VERSION,
            batch_number_at_upgrade,
            moved_results,
            "Migrated batching schema"
        );
        Ok(MigrationOutcome::Migrated { batch_number_at_upgrade, moved_results })
    }
}
