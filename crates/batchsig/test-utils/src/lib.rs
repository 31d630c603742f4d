//! Test helpers for the batching crates
//!
//! Deterministic validators (fixed-seed secp256k1 keys) and in-memory
//! staking, slashing and key-registry collaborators with interior mutability,
//! so a whole validator set can be stood up in a few lines:
//!
//! ```ignore
//! let net = TestNet::new(&[333, 334, 333]);
//! let staking = net.staking.clone();
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod keepers;
mod validator;

pub use keepers::{MockPubKeyRegistry, MockSlashing, MockStaking, SlashRecord};
pub use validator::TestValidator;

use std::sync::Arc;

use alloy_primitives::{keccak256, Bytes, B256};
use batchsig_primitives::DataResult;

/// A validator set wired into shared in-memory collaborators.
#[derive(Debug, Clone)]
pub struct TestNet {
    /// Validators in creation order
    pub validators: Vec<TestValidator>,
    /// Staking module holding every validator
    pub staking: Arc<MockStaking>,
    /// Slashing module backed by `staking`
    pub slashing: Arc<MockSlashing>,
    /// Key registry with every batch key registered and secp256k1 activated
    pub registry: Arc<MockPubKeyRegistry>,
}

impl TestNet {
    /// One validator per entry of `powers`, seeded `1..=powers.len()`.
    pub fn new(powers: &[u64]) -> Self {
        let validators: Vec<TestValidator> = powers
            .iter()
            .enumerate()
            .map(|(i, power)| TestValidator::new(i as u8 + 1, *power))
            .collect();

        let staking = Arc::new(MockStaking::default());
        let registry = Arc::new(MockPubKeyRegistry::default());
        for validator in &validators {
            staking.add_validator(validator.info());
            registry.register(validator.operator_address(), validator.batch_public_key());
        }
        registry.activate();
        let slashing = Arc::new(MockSlashing::new(staking.clone()));

        Self { validators, staking, slashing, registry }
    }

    /// Validator by creation index
    pub fn validator(&self, index: usize) -> &TestValidator {
        &self.validators[index]
    }
}

/// Deterministic unbatched data result.
pub fn data_result(seed: u64, dr_block_height: u64) -> DataResult {
    DataResult {
        dr_id: data_request_id(seed),
        dr_block_height,
        block_height: dr_block_height + 1,
        exit_code: 0,
        gas_used: 1_000 + seed,
        result: Bytes::from(seed.to_be_bytes().to_vec()),
        consensus: true,
        batched: false,
    }
}

/// Deterministic data request id
pub fn data_request_id(seed: u64) -> B256 {
    keccak256(seed.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchsig_primitives::{ProvingScheme, PubKeyRegistry, StakingKeeper};

    #[test]
    fn test_net_is_fully_registered() {
        let net = TestNet::new(&[10, 20, 30]);

        assert_eq!(net.staking.last_total_power().unwrap(), 60);
        assert!(net.registry.is_proving_scheme_activated(ProvingScheme::Secp256k1).unwrap());
        for validator in &net.validators {
            let key = net.registry.validator_key(&validator.operator_address(), ProvingScheme::Secp256k1).unwrap();
            assert_eq!(key, Some(validator.batch_public_key()));
            let info = net.staking.validator_by_cons_addr(&validator.cons_address()).unwrap().unwrap();
            assert_eq!(info.operator_address, validator.operator_address());
        }
    }

    #[test]
    fn test_data_results_are_distinct() {
        assert_ne!(data_result(1, 5).dr_id, data_result(2, 5).dr_id);
        assert_eq!(data_result(1, 5), data_result(1, 5));
    }
}
