use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use batchsig_primitives::{
    BatchSigner, ConsAddress, CryptoError, OperatorAddress, Secp256k1Signer, ValidatorInfo,
};

/// Tokens bonded per unit of consensus power.
const TOKENS_PER_POWER: u64 = 1_000_000;

fn derive_key(domain: u8, seed: u8) -> Secp256k1Signer {
    Secp256k1Signer::from_slice(keccak256([domain, seed]).as_slice()).expect("keccak output is a valid scalar")
}

/// A validator with deterministic consensus and batch-signing keys.
#[derive(Debug, Clone)]
pub struct TestValidator {
    seed: u8,
    power: u64,
    consensus_key: Secp256k1Signer,
    batch_key: Secp256k1Signer,
}

impl TestValidator {
    /// Keys derived from `seed`.
    pub fn new(seed: u8, power: u64) -> Self {
        let consensus_key = derive_key(b'c', seed);
        let batch_key = derive_key(b'b', seed);
        Self { seed, power, consensus_key, batch_key }
    }

    /// Seed the keys were derived from
    pub const fn seed(&self) -> u8 {
        self.seed
    }

    /// Consensus power
    pub const fn power(&self) -> u64 {
        self.power
    }

    /// Operator address, `0x00..00 ‖ seed`
    pub fn operator_address(&self) -> OperatorAddress {
        Address::with_last_byte(self.seed)
    }

    /// Consensus address derived from the consensus key
    pub fn cons_address(&self) -> ConsAddress {
        self.consensus_key.address()
    }

    /// Consensus key
    pub const fn consensus_key(&self) -> &Secp256k1Signer {
        &self.consensus_key
    }

    /// Batch-signing key
    pub const fn batch_key(&self) -> &Secp256k1Signer {
        &self.batch_key
    }

    /// Compressed batch-signing public key, as registered in the key registry
    pub fn batch_public_key(&self) -> Bytes {
        self.batch_key.public_key()
    }

    /// Ethereum address of the batch-signing key
    pub fn eth_address(&self) -> Address {
        self.batch_key.address()
    }

    /// Sign a batch id with the batch key
    pub fn sign_batch(&self, batch_id: B256) -> Result<Bytes, CryptoError> {
        self.batch_key.sign_batch_id(batch_id)
    }

    /// Sign arbitrary bytes with the consensus key
    pub fn sign_consensus(&self, msg: &[u8]) -> Bytes {
        self.consensus_key.sign_message(msg)
    }

    /// Staking-module view of this validator
    pub fn info(&self) -> ValidatorInfo {
        ValidatorInfo {
            operator_address: self.operator_address(),
            cons_address: self.cons_address(),
            consensus_pubkey: self.consensus_key.public_key(),
            power: self.power,
            tokens: U256::from(self.power) * U256::from(TOKENS_PER_POWER),
            jailed: false,
        }
    }
}
