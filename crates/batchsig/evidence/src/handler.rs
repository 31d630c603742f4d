use alloy_primitives::U256;
use batchsig_primitives::{
    crypto::recover_signer_candidates, ConsensusParams, OperatorAddress, SlashingKeeper,
    SlashingParams, StakingKeeper,
};
use batchsig_store::{BatchStore, KvStore};
use tracing::{info, warn};

use crate::{BatchDoubleSign, EvidenceError};

/// Emitted when a validator is slashed for double-signing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDoubleSignSlashed {
    /// Slashed validator
    pub operator_address: OperatorAddress,
    /// Power at the batch height
    pub power: u64,
    /// Tokens burned
    pub burned: U256,
    /// Double-signed batch
    pub batch_number: u64,
    /// Scheme of the offending signature
    pub proving_scheme_index: u32,
}

/// Result of accepted evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceOutcome {
    /// Validator slashed, jailed and tombstoned
    Slashed(BatchDoubleSignSlashed),
    /// Evidence older than the maximum evidence age
    Stale,
    /// Validator was already tombstoned
    AlreadyTombstoned,
}

/// Adjudicates batch double-sign evidence.
#[derive(Debug, Clone)]
pub struct EvidenceHandler<K, Sl> {
    staking: K,
    slashing: Sl,
    consensus: ConsensusParams,
    params: SlashingParams,
}

impl<K, Sl> EvidenceHandler<K, Sl>
where
    K: StakingKeeper,
    Sl: SlashingKeeper,
{
    /// Create a new handler
    pub const fn new(staking: K, slashing: Sl, consensus: ConsensusParams, params: SlashingParams) -> Self {
        Self { staking, slashing, consensus, params }
    }

    /// Adjudicate `evidence` submitted at `current_height`.
    pub fn handle_double_sign<S: KvStore>(
        &self,
        store: &BatchStore<S>,
        current_height: i64,
        evidence: &BatchDoubleSign,
    ) -> Result<EvidenceOutcome, EvidenceError> {
        evidence.validate_basic()?;

        let batch = store.get_batch_by_number(evidence.batch_number)?;
        let claimed_id = evidence.claimed_batch_id()?;
        if claimed_id == batch.batch_id {
            return Err(EvidenceError::SameBatchId(claimed_id));
        }

        // signer set the accused was part of when signing
        let entry = store.get_validator_tree_entry(evidence.batch_number - 1, &evidence.operator_address)?;
        let recovered = recover_signer_candidates(claimed_id, &evidence.signature_bytes()?)?;
        if !recovered.contains(&entry.eth_address) {
            return Err(EvidenceError::SignerMismatch {
                validator: evidence.operator_address,
                expected: entry.eth_address,
                recovered,
            });
        }

        let age = current_height.saturating_sub(batch.block_height);
        if age > self.consensus.evidence_max_age_num_blocks {
            info!(
                target: "batchsig::evidence",
                validator = %evidence.operator_address,
                batch_number = evidence.batch_number,
                age,
                max_age = self.consensus.evidence_max_age_num_blocks,
                "Ignoring stale double-sign evidence"
            );
            return Ok(EvidenceOutcome::Stale);
        }

        let validator = self
            .staking
            .historical_validator(batch.block_height, &evidence.operator_address)?
            .ok_or(EvidenceError::ValidatorNotFound { operator: evidence.operator_address, height: batch.block_height })?;
        if self.slashing.is_tombstoned(&validator.cons_address)? {
            info!(
                target: "batchsig::evidence",
                validator = %evidence.operator_address,
                batch_number = evidence.batch_number,
                "Ignoring double-sign evidence, validator already tombstoned"
            );
            return Ok(EvidenceOutcome::AlreadyTombstoned);
        }

        let burned = self.slashing.slash(
            &validator.cons_address,
            batch.block_height,
            validator.power,
            self.params.slash_fraction_double_sign,
        )?;
        if !validator.jailed {
            self.slashing.jail(&validator.cons_address)?;
        }
        self.slashing.tombstone(&validator.cons_address)?;

        let event = BatchDoubleSignSlashed {
            operator_address: evidence.operator_address,
            power: validator.power,
            burned,
            batch_number: evidence.batch_number,
            proving_scheme_index: evidence.proving_scheme_index,
        };
        warn!(
            target: "batchsig::evidence",
            validator = %event.operator_address,
            power = event.power,
            burned = %event.burned,
            batch_number = event.batch_number,
            proving_scheme_index = event.proving_scheme_index,
            "Slashed validator for batch double-sign"
        );
        Ok(EvidenceOutcome::Slashed(event))
    }
}
