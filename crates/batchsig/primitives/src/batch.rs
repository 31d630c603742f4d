//! Batch records and the entries of the trees they commit to

use alloy_primitives::{keccak256, Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::OperatorAddress;

/// Byte prepended to every tree entry before hashing.
///
/// Keeps data-result leaves and validator leaves in disjoint preimage spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DomainSeparator {
    /// Leaf of the data-result tree
    DataResult = 0x00,
    /// Leaf of the validator tree (secp256k1 signing key)
    Secp256k1 = 0x01,
}

impl DomainSeparator {
    /// Prefix `payload` with this separator.
    pub fn tag(self, payload: &[u8]) -> Vec<u8> {
        let mut entry = Vec::with_capacity(payload.len() + 1);
        entry.push(self as u8);
        entry.extend_from_slice(payload);
        entry
    }
}

impl From<DomainSeparator> for u8 {
    fn from(sep: DomainSeparator) -> u8 {
        sep as u8
    }
}

/// A committed snapshot of batched data results and the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Sequential batch number
    pub batch_number: u64,
    /// Height of the block that produced the batch
    pub block_height: i64,
    /// Root over the data results batched in this batch only
    pub current_data_result_root: B256,
    /// Root chained with the previous batch's data-result root
    pub data_result_root: B256,
    /// Root over the validator tree
    pub validator_root: B256,
    /// Identifier validators sign
    pub batch_id: B256,
    /// Opaque proving metadata (empty today)
    pub proving_metadata: Bytes,
}

impl Batch {
    /// Recompute the batch id from the stored fields.
    pub fn compute_id(&self) -> B256 {
        compute_batch_id(
            self.batch_number,
            self.block_height,
            self.validator_root,
            self.data_result_root,
            proving_metadata_hash(&self.proving_metadata),
        )
    }
}

/// Hash of the proving metadata, or the zero hash when there is none.
pub fn proving_metadata_hash(proving_metadata: &[u8]) -> B256 {
    if proving_metadata.is_empty() { B256::ZERO } else { keccak256(proving_metadata) }
}

/// Compute a batch id.
///
/// `keccak256(batch_number ‖ block_height ‖ validator_root ‖ data_result_root ‖ proving_metadata_hash)`
/// with both integers encoded as 8-byte big-endian.
pub fn compute_batch_id(
    batch_number: u64,
    block_height: i64,
    validator_root: B256,
    data_result_root: B256,
    proving_metadata_hash: B256,
) -> B256 {
    let mut data = Vec::with_capacity(8 + 8 + 32 * 3);
    data.extend_from_slice(&batch_number.to_be_bytes());
    data.extend_from_slice(&block_height.to_be_bytes());
    data.extend_from_slice(validator_root.as_slice());
    data.extend_from_slice(data_result_root.as_slice());
    data.extend_from_slice(proving_metadata_hash.as_slice());
    keccak256(&data)
}

/// One validator's leaf in the validator tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorTreeEntry {
    /// Operator address of the validator
    pub validator_address: OperatorAddress,
    /// Share of the last total power, denominator 1e8
    pub voting_power_percent: u32,
    /// Ethereum address derived from the registered secp256k1 key
    pub eth_address: Address,
}

impl ValidatorTreeEntry {
    /// Tree entry bytes: `0x01 ‖ eth_address ‖ power_percent (u32 BE)`.
    pub fn leaf_entry(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(20 + 4);
        payload.extend_from_slice(self.eth_address.as_slice());
        payload.extend_from_slice(&self.voting_power_percent.to_be_bytes());
        DomainSeparator::Secp256k1.tag(&payload)
    }
}

/// Tree entry bytes for a data result: `0x00 ‖ dr_id`.
pub fn data_result_leaf_entry(dr_id: &B256) -> Vec<u8> {
    DomainSeparator::DataResult.tag(dr_id.as_slice())
}

/// The entries a batch's roots were computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntries {
    /// Raw data-result identifiers, without separator
    pub data_result_entries: Vec<B256>,
    /// Validator tree entries in construction order
    pub validator_entries: Vec<ValidatorTreeEntry>,
}

/// A validator's signature over a batch, as collected from vote extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSignatures {
    /// Operator address of the signer
    pub validator_address: OperatorAddress,
    /// Voting power recorded in the commit that carried the signature
    pub voting_power: u64,
    /// Compact secp256k1 signature over the batch id
    pub signatures: Bytes,
}
