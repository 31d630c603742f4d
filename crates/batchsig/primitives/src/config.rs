//! Batching configuration types

use std::path::Path;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A parameter is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A rational number in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    /// Numerator
    pub numerator: u64,
    /// Denominator
    pub denominator: u64,
}

impl Fraction {
    /// Create a new fraction
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self { numerator, denominator }
    }

    /// `amount * numerator / denominator`, rounded down.
    pub fn apply(&self, amount: U256) -> U256 {
        if self.denominator == 0 {
            return U256::ZERO;
        }
        amount * U256::from(self.numerator) / U256::from(self.denominator)
    }

    fn is_valid(&self) -> bool {
        self.denominator != 0 && self.numerator <= self.denominator
    }
}

/// Batch retention and pruning limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingParams {
    /// Number of most recent batches kept in state
    pub num_batches_to_keep: u64,
    /// Batches deleted per block while catching up after the migration
    pub max_batch_prune_per_block: u64,
    /// Legacy data results deleted per block while catching up
    pub max_legacy_result_prune_per_block: u64,
}

impl Default for BatchingParams {
    fn default() -> Self {
        Self {
            num_batches_to_keep: 30_000,
            max_batch_prune_per_block: 100,
            max_legacy_result_prune_per_block: 1_000,
        }
    }
}

/// Chain parameters owned by the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Chain id bound into vote-extension signatures
    pub chain_id: String,
    /// First height whose precommits carry vote extensions (0 = disabled)
    pub vote_extensions_enable_height: i64,
    /// Evidence older than this many blocks is ignored
    pub evidence_max_age_num_blocks: i64,
    /// Byte budget of a block's transactions
    pub max_block_bytes: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            chain_id: "batchsig-devnet".to_string(),
            vote_extensions_enable_height: 1,
            evidence_max_age_num_blocks: 100_000,
            max_block_bytes: 22_020_096,
        }
    }
}

impl ConsensusParams {
    /// Whether the commit for `height - 1` carries vote extensions.
    pub const fn vote_extensions_enabled(&self, height: i64) -> bool {
        self.vote_extensions_enable_height > 0 && height > self.vote_extensions_enable_height
    }
}

/// Slashing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlashingParams {
    /// Fraction of stake burned for signing two batches with one number
    pub slash_fraction_double_sign: Fraction,
}

impl Default for SlashingParams {
    fn default() -> Self {
        Self { slash_fraction_double_sign: Fraction::new(5, 100) }
    }
}

/// Full configuration of the batching module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Retention and pruning limits
    pub batching: BatchingParams,
    /// Consensus parameters
    pub consensus: ConsensusParams,
    /// Slashing parameters
    pub slashing: SlashingParams,
}

impl BatchingConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batching.num_batches_to_keep == 0 {
            return Err(ConfigError::Invalid("num_batches_to_keep must be positive".into()));
        }
        if self.batching.max_batch_prune_per_block == 0 {
            return Err(ConfigError::Invalid("max_batch_prune_per_block must be positive".into()));
        }
        if self.batching.max_legacy_result_prune_per_block == 0 {
            return Err(ConfigError::Invalid(
                "max_legacy_result_prune_per_block must be positive".into(),
            ));
        }
        if self.consensus.chain_id.is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".into()));
        }
        if self.consensus.vote_extensions_enable_height < 0 {
            return Err(ConfigError::Invalid("vote_extensions_enable_height is negative".into()));
        }
        if !self.slashing.slash_fraction_double_sign.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "slash_fraction_double_sign {}/{} is not in [0, 1]",
                self.slashing.slash_fraction_double_sign.numerator,
                self.slashing.slash_fraction_double_sign.denominator,
            )));
        }
        Ok(())
    }
}
