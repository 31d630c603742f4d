use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use alloy_primitives::{Bytes, U256};
use batchsig_primitives::{
    CollaboratorError, ConsAddress, Fraction, OperatorAddress, ProvingScheme, PubKeyRegistry,
    SlashingKeeper, StakingKeeper, ValidatorInfo,
};
use parking_lot::{Mutex, RwLock};

/// In-memory staking module.
///
/// Validators keep their insertion order; [`StakingKeeper::last_validator_powers`]
/// reports non-jailed validators by descending power.
#[derive(Debug, Default)]
pub struct MockStaking {
    validators: RwLock<Vec<ValidatorInfo>>,
    historical: RwLock<BTreeMap<i64, Vec<ValidatorInfo>>>,
}

impl MockStaking {
    /// Add or replace a validator
    pub fn add_validator(&self, info: ValidatorInfo) {
        let mut validators = self.validators.write();
        match validators.iter_mut().find(|v| v.operator_address == info.operator_address) {
            Some(existing) => *existing = info,
            None => validators.push(info),
        }
    }

    /// Change a validator's power
    pub fn set_power(&self, operator: &OperatorAddress, power: u64) {
        if let Some(v) = self.validators.write().iter_mut().find(|v| &v.operator_address == operator) {
            v.power = power;
        }
    }

    /// Snapshot the current set as the historical entry for `height`
    pub fn record_historical(&self, height: i64) {
        let snapshot = self.validators.read().clone();
        self.historical.write().insert(height, snapshot);
    }

    /// Current view of a validator
    pub fn validator(&self, operator: &OperatorAddress) -> Option<ValidatorInfo> {
        self.validators.read().iter().find(|v| &v.operator_address == operator).cloned()
    }

    fn update_by_cons<F: FnOnce(&mut ValidatorInfo)>(&self, cons: &ConsAddress, f: F) -> Result<(), CollaboratorError> {
        let mut validators = self.validators.write();
        let validator = validators
            .iter_mut()
            .find(|v| &v.cons_address == cons)
            .ok_or(CollaboratorError::ValidatorNotFound(*cons))?;
        f(validator);
        Ok(())
    }
}

impl StakingKeeper for MockStaking {
    fn validator_by_cons_addr(&self, cons: &ConsAddress) -> Result<Option<ValidatorInfo>, CollaboratorError> {
        Ok(self.validators.read().iter().find(|v| &v.cons_address == cons).cloned())
    }

    fn last_total_power(&self) -> Result<u64, CollaboratorError> {
        Ok(self.validators.read().iter().filter(|v| !v.jailed).map(|v| v.power).sum())
    }

    fn last_validator_powers(&self) -> Result<Vec<(OperatorAddress, u64)>, CollaboratorError> {
        let mut powers: Vec<(OperatorAddress, u64)> = self
            .validators
            .read()
            .iter()
            .filter(|v| !v.jailed && v.power > 0)
            .map(|v| (v.operator_address, v.power))
            .collect();
        powers.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(powers)
    }

    fn historical_validator(
        &self,
        height: i64,
        operator: &OperatorAddress,
    ) -> Result<Option<ValidatorInfo>, CollaboratorError> {
        let historical = self.historical.read();
        let snapshot = historical.range(..=height).next_back().map(|(_, set)| set);
        Ok(match snapshot {
            Some(set) => set.iter().find(|v| &v.operator_address == operator).cloned(),
            None => self.validator(operator),
        })
    }
}

/// One call to [`SlashingKeeper::slash`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashRecord {
    /// Slashed validator
    pub cons_address: ConsAddress,
    /// Height of the infraction
    pub infraction_height: i64,
    /// Power at the infraction
    pub power: u64,
    /// Fraction applied
    pub fraction: Fraction,
    /// Tokens burned
    pub burned: U256,
}

/// In-memory slashing module that burns tokens held by a [`MockStaking`].
#[derive(Debug)]
pub struct MockSlashing {
    staking: Arc<MockStaking>,
    slashes: Mutex<Vec<SlashRecord>>,
    tombstoned: Mutex<HashSet<ConsAddress>>,
}

impl MockSlashing {
    /// Slash validators held by `staking`
    pub fn new(staking: Arc<MockStaking>) -> Self {
        Self { staking, slashes: Mutex::default(), tombstoned: Mutex::default() }
    }

    /// Every slash applied so far
    pub fn slashes(&self) -> Vec<SlashRecord> {
        self.slashes.lock().clone()
    }
}

impl SlashingKeeper for MockSlashing {
    fn slash(
        &self,
        cons: &ConsAddress,
        infraction_height: i64,
        power: u64,
        fraction: Fraction,
    ) -> Result<U256, CollaboratorError> {
        let mut burned = U256::ZERO;
        self.staking.update_by_cons(cons, |v| {
            burned = fraction.apply(v.tokens);
            v.tokens -= burned;
        })?;
        self.slashes.lock().push(SlashRecord {
            cons_address: *cons,
            infraction_height,
            power,
            fraction,
            burned,
        });
        Ok(burned)
    }

    fn jail(&self, cons: &ConsAddress) -> Result<(), CollaboratorError> {
        self.staking.update_by_cons(cons, |v| v.jailed = true)
    }

    fn tombstone(&self, cons: &ConsAddress) -> Result<(), CollaboratorError> {
        self.tombstoned.lock().insert(*cons);
        Ok(())
    }

    fn is_tombstoned(&self, cons: &ConsAddress) -> Result<bool, CollaboratorError> {
        Ok(self.tombstoned.lock().contains(cons))
    }
}

/// In-memory public-key registry.
#[derive(Debug, Default)]
pub struct MockPubKeyRegistry {
    keys: RwLock<HashMap<OperatorAddress, Bytes>>,
    activated: RwLock<bool>,
}

impl MockPubKeyRegistry {
    /// Register `key` as the validator's secp256k1 key
    pub fn register(&self, operator: OperatorAddress, key: Bytes) {
        self.keys.write().insert(operator, key);
    }

    /// Drop a validator's key
    pub fn unregister(&self, operator: &OperatorAddress) {
        self.keys.write().remove(operator);
    }

    /// Activate the secp256k1 proving scheme
    pub fn activate(&self) {
        *self.activated.write() = true;
    }

    /// Deactivate the secp256k1 proving scheme
    pub fn deactivate(&self) {
        *self.activated.write() = false;
    }
}

impl PubKeyRegistry for MockPubKeyRegistry {
    fn validator_key(
        &self,
        operator: &OperatorAddress,
        scheme: ProvingScheme,
    ) -> Result<Option<Bytes>, CollaboratorError> {
        match scheme {
            ProvingScheme::Secp256k1 => Ok(self.keys.read().get(operator).cloned()),
        }
    }

    fn is_proving_scheme_activated(&self, scheme: ProvingScheme) -> Result<bool, CollaboratorError> {
        match scheme {
            ProvingScheme::Secp256k1 => Ok(*self.activated.read()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestValidator;

    #[test]
    fn test_powers_sorted_and_jailed_excluded() {
        let staking = Arc::new(MockStaking::default());
        let a = TestValidator::new(1, 10);
        let b = TestValidator::new(2, 30);
        staking.add_validator(a.info());
        staking.add_validator(b.info());

        let powers = staking.last_validator_powers().unwrap();
        assert_eq!(powers, vec![(b.operator_address(), 30), (a.operator_address(), 10)]);

        let slashing = MockSlashing::new(staking.clone());
        slashing.jail(&b.cons_address()).unwrap();
        assert_eq!(staking.last_total_power().unwrap(), 10);
    }

    #[test]
    fn test_slash_burns_fraction_of_tokens() {
        let staking = Arc::new(MockStaking::default());
        let v = TestValidator::new(3, 100);
        staking.add_validator(v.info());
        let slashing = MockSlashing::new(staking.clone());

        let before = staking.validator(&v.operator_address()).unwrap().tokens;
        let burned = slashing.slash(&v.cons_address(), 5, 100, Fraction::new(5, 100)).unwrap();

        assert_eq!(burned, before / U256::from(20));
        assert_eq!(staking.validator(&v.operator_address()).unwrap().tokens, before - burned);
        assert_eq!(slashing.slashes().len(), 1);
    }

    #[test]
    fn test_historical_falls_back_to_current() {
        let staking = MockStaking::default();
        let v = TestValidator::new(4, 50);
        staking.add_validator(v.info());
        staking.record_historical(10);
        staking.set_power(&v.operator_address(), 70);

        assert_eq!(staking.historical_validator(12, &v.operator_address()).unwrap().unwrap().power, 50);
        assert_eq!(staking.historical_validator(5, &v.operator_address()).unwrap().unwrap().power, 70);
    }
}
