//! Key layout of the batching collections

use alloy_primitives::{Address, B256};
use batchsig_primitives::DataResultKey;

use crate::StoreError;

/// Batches by number
pub const BATCH_PREFIX: u8 = 0x01;
/// Batch height -> batch number
pub const BATCH_HEIGHT_PREFIX: u8 = 0x02;
/// Next batch number
pub const BATCH_SEQUENCE_KEY: &[u8] = &[0x03];
/// Tree entries by batch number
pub const TREE_ENTRIES_PREFIX: u8 = 0x04;
/// Validator tree entries by (batch number, operator)
pub const VALIDATOR_ENTRY_PREFIX: u8 = 0x05;
/// Batch signatures by (batch number, operator)
pub const SIGNATURES_PREFIX: u8 = 0x06;
/// Current data results by (batched, dr id, dr height)
pub const DATA_RESULT_PREFIX: u8 = 0x07;
/// (dr id, dr height) -> batch number
pub const BATCH_ASSIGNMENT_PREFIX: u8 = 0x08;
/// (batch number, dr id, dr height), reverse of the assignment index
pub const BATCH_RESULTS_PREFIX: u8 = 0x09;
/// Data results written under the legacy schema
pub const LEGACY_DATA_RESULT_PREFIX: u8 = 0x0a;
/// Pruning watermark
pub const PRUNING_WATERMARK_KEY: &[u8] = &[0x0b];
/// Schema version
pub const SCHEMA_VERSION_KEY: &[u8] = &[0x0f];

const DR_KEY_LEN: usize = 32 + 8;

/// Order-preserving encoding of a signed height.
pub const fn encode_height(height: i64) -> [u8; 8] {
    ((height as u64) ^ (1 << 63)).to_be_bytes()
}

/// Inverse of [`encode_height`].
pub const fn decode_height(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// `None` when the prefix is all `0xff` and the range is open-ended.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn key(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    key.push(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn dr_key_bytes(dr: &DataResultKey) -> [u8; DR_KEY_LEN] {
    let mut out = [0u8; DR_KEY_LEN];
    out[..32].copy_from_slice(dr.dr_id.as_slice());
    out[32..].copy_from_slice(&dr.dr_block_height.to_be_bytes());
    out
}

/// Decode the trailing `dr_id ‖ dr_height` of a data-result key.
pub fn decode_dr_key(key: &[u8]) -> Result<DataResultKey, StoreError> {
    let tail = key
        .len()
        .checked_sub(DR_KEY_LEN)
        .map(|start| &key[start..])
        .ok_or_else(|| StoreError::MalformedKey(key.to_vec()))?;
    let mut height = [0u8; 8];
    height.copy_from_slice(&tail[32..]);
    Ok(DataResultKey::new(B256::from_slice(&tail[..32]), u64::from_be_bytes(height)))
}

/// Decode the batch number following the one-byte prefix.
pub fn decode_batch_number(key: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] =
        key.get(1..9).and_then(|b| b.try_into().ok()).ok_or_else(|| StoreError::MalformedKey(key.to_vec()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// `0x01 ‖ number`
pub fn batch(number: u64) -> Vec<u8> {
    key(BATCH_PREFIX, &[&number.to_be_bytes()])
}

/// `0x02 ‖ height`
pub fn batch_height(height: i64) -> Vec<u8> {
    key(BATCH_HEIGHT_PREFIX, &[&encode_height(height)])
}

/// `0x04 ‖ number`
pub fn tree_entries(number: u64) -> Vec<u8> {
    key(TREE_ENTRIES_PREFIX, &[&number.to_be_bytes()])
}

/// `0x05 ‖ number ‖ operator`
pub fn validator_entry(number: u64, operator: &Address) -> Vec<u8> {
    key(VALIDATOR_ENTRY_PREFIX, &[&number.to_be_bytes(), operator.as_slice()])
}

/// `0x06 ‖ number ‖ operator`
pub fn signature(number: u64, operator: &Address) -> Vec<u8> {
    key(SIGNATURES_PREFIX, &[&number.to_be_bytes(), operator.as_slice()])
}

/// `0x07 ‖ batched ‖ dr_id ‖ dr_height`
pub fn data_result(batched: bool, dr: &DataResultKey) -> Vec<u8> {
    key(DATA_RESULT_PREFIX, &[&[u8::from(batched)], &dr_key_bytes(dr)])
}

/// `0x07 ‖ batched`
pub fn data_results_by_status(batched: bool) -> Vec<u8> {
    key(DATA_RESULT_PREFIX, &[&[u8::from(batched)]])
}

/// `0x08 ‖ dr_id ‖ dr_height`
pub fn batch_assignment(dr: &DataResultKey) -> Vec<u8> {
    key(BATCH_ASSIGNMENT_PREFIX, &[&dr_key_bytes(dr)])
}

/// `0x09 ‖ number ‖ dr_id ‖ dr_height`
pub fn batch_result(number: u64, dr: &DataResultKey) -> Vec<u8> {
    key(BATCH_RESULTS_PREFIX, &[&number.to_be_bytes(), &dr_key_bytes(dr)])
}

/// `0x0a ‖ dr_id ‖ dr_height`
pub fn legacy_data_result(dr: &DataResultKey) -> Vec<u8> {
    key(LEGACY_DATA_RESULT_PREFIX, &[&dr_key_bytes(dr)])
}

/// `prefix ‖ number`, the start of a per-batch sub-range.
pub fn per_batch(prefix: u8, number: u64) -> Vec<u8> {
    key(prefix, &[&number.to_be_bytes()])
}

/// `[prefix ‖ first, prefix ‖ last + 1)` as a half-open key range.
pub fn per_batch_range(prefix: u8, first: u64, last: u64) -> (Vec<u8>, Option<Vec<u8>>) {
    let start = per_batch(prefix, first);
    let end = match last.checked_add(1) {
        Some(next) => Some(per_batch(prefix, next)),
        None => prefix_end(&[prefix]),
    };
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_encoding_preserves_order() {
        let heights = [i64::MIN, -5, -1, 0, 1, 100, i64::MAX];
        for pair in heights.windows(2) {
            assert!(encode_height(pair[0]) < encode_height(pair[1]));
        }
        for h in heights {
            assert_eq!(decode_height(encode_height(h)), h);
        }
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[0x01]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }

    #[test]
    fn test_data_result_key_roundtrip() {
        let dr = DataResultKey::new(B256::repeat_byte(7), 42);
        assert_eq!(decode_dr_key(&data_result(true, &dr)).unwrap(), dr);
        assert_eq!(decode_dr_key(&batch_result(9, &dr)).unwrap(), dr);
        assert_eq!(decode_batch_number(&batch_result(9, &dr)).unwrap(), 9);
        assert!(decode_dr_key(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_per_batch_range_covers_numbers() {
        let (start, end) = per_batch_range(SIGNATURES_PREFIX, 3, 5);
        let end = end.unwrap();
        let inside = signature(5, &Address::repeat_byte(0xff));
        let outside = signature(6, &Address::ZERO);
        assert!(start <= signature(3, &Address::ZERO) && inside < end);
        assert!(outside >= end);
    }
}
