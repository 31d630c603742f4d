use std::str::FromStr;

use alloy_primitives::{hex, Bytes, B256};
use batchsig_primitives::{compute_batch_id, OperatorAddress, ProvingScheme, FIRST_BATCH_NUMBER};
use serde::{Deserialize, Serialize};

use crate::EvidenceError;

/// Evidence that a validator signed a batch id other than the one produced
/// for `batch_number`.
///
/// Roots and hashes are hex strings as submitted by the reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDoubleSign {
    /// Batch number the conflicting signature claims
    pub batch_number: u64,
    /// Block height the conflicting batch claims
    pub block_height: i64,
    /// Accused validator
    pub operator_address: OperatorAddress,
    /// Claimed validator root
    pub validator_root: String,
    /// Claimed chained data-result root
    pub data_result_root: String,
    /// Claimed proving-metadata hash
    pub proving_metadata_hash: String,
    /// Signature over the claimed batch id, 64 or 65 bytes
    pub signature: String,
    /// Registry index of the signing scheme
    pub proving_scheme_index: u32,
}

fn parse_b256(field: &'static str, value: &str) -> Result<B256, EvidenceError> {
    B256::from_str(value).map_err(|e| EvidenceError::InvalidHex { field, reason: e.to_string() })
}

impl BatchDoubleSign {
    /// Stateless checks.
    pub fn validate_basic(&self) -> Result<(), EvidenceError> {
        if self.batch_number <= FIRST_BATCH_NUMBER {
            return Err(EvidenceError::InvalidBatchNumber(self.batch_number));
        }
        if self.block_height < 1 {
            return Err(EvidenceError::InvalidBlockHeight(self.block_height));
        }
        for (field, value) in [
            ("validator root", &self.validator_root),
            ("data result root", &self.data_result_root),
            ("proving metadata hash", &self.proving_metadata_hash),
            ("signature", &self.signature),
        ] {
            if value.is_empty() {
                return Err(EvidenceError::EmptyField(field));
            }
        }
        if ProvingScheme::try_from(self.proving_scheme_index) != Ok(ProvingScheme::Secp256k1) {
            return Err(EvidenceError::UnsupportedProvingScheme(self.proving_scheme_index));
        }
        Ok(())
    }

    /// Batch id the conflicting signature commits to.
    pub fn claimed_batch_id(&self) -> Result<B256, EvidenceError> {
        Ok(compute_batch_id(
            self.batch_number,
            self.block_height,
            parse_b256("validator root", &self.validator_root)?,
            parse_b256("data result root", &self.data_result_root)?,
            parse_b256("proving metadata hash", &self.proving_metadata_hash)?,
        ))
    }

    /// Decoded signature bytes.
    pub fn signature_bytes(&self) -> Result<Bytes, EvidenceError> {
        hex::decode(&self.signature)
            .map(Bytes::from)
            .map_err(|e| EvidenceError::InvalidHex { field: "signature", reason: e.to_string() })
    }
}
