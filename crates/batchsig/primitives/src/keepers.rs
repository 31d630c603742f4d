//! Interfaces of the modules the batching core consumes but does not own

use alloy_primitives::{Bytes, U256};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use crate::{config::Fraction, CollaboratorError, ConsAddress, OperatorAddress, ProvingScheme};

/// A bonded validator as seen by the staking module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Operator address
    pub operator_address: OperatorAddress,
    /// Consensus address, as it appears in commit votes
    pub cons_address: ConsAddress,
    /// SEC1-encoded secp256k1 consensus public key
    pub consensus_pubkey: Bytes,
    /// Consensus power
    pub power: u64,
    /// Bonded tokens
    pub tokens: U256,
    /// Whether the validator is jailed
    pub jailed: bool,
}

/// Read access to the staking module.
#[auto_impl(&, Arc)]
pub trait StakingKeeper {
    /// Validator with the given consensus address
    fn validator_by_cons_addr(&self, cons: &ConsAddress) -> Result<Option<ValidatorInfo>, CollaboratorError>;

    /// Total power recorded at the end of the last block
    fn last_total_power(&self) -> Result<u64, CollaboratorError>;

    /// Power of every active validator at the end of the last block, in the
    /// staking module's iteration order.
    fn last_validator_powers(&self) -> Result<Vec<(OperatorAddress, u64)>, CollaboratorError>;

    /// Historical entry of a validator at `height`
    fn historical_validator(
        &self,
        height: i64,
        operator: &OperatorAddress,
    ) -> Result<Option<ValidatorInfo>, CollaboratorError>;
}

/// Punitive actions of the slashing module.
#[auto_impl(&, Arc)]
pub trait SlashingKeeper {
    /// Burn `fraction` of the stake the validator had at `infraction_height`,
    /// returning the amount burned.
    fn slash(
        &self,
        cons: &ConsAddress,
        infraction_height: i64,
        power: u64,
        fraction: Fraction,
    ) -> Result<U256, CollaboratorError>;

    /// Jail the validator
    fn jail(&self, cons: &ConsAddress) -> Result<(), CollaboratorError>;

    /// Permanently bar the validator from rejoining
    fn tombstone(&self, cons: &ConsAddress) -> Result<(), CollaboratorError>;

    /// Whether the validator has been tombstoned
    fn is_tombstoned(&self, cons: &ConsAddress) -> Result<bool, CollaboratorError>;
}

/// Per-validator signing keys registered for each proving scheme.
#[auto_impl(&, Arc)]
pub trait PubKeyRegistry {
    /// SEC1 public key the validator registered for `scheme`
    fn validator_key(
        &self,
        operator: &OperatorAddress,
        scheme: ProvingScheme,
    ) -> Result<Option<Bytes>, CollaboratorError>;

    /// Whether `scheme` has been activated chain-wide
    fn is_proving_scheme_activated(&self, scheme: ProvingScheme) -> Result<bool, CollaboratorError>;
}
