use alloy_primitives::Bytes;
use alloy_rlp::RlpEncodable;

/// Payload a validator's consensus key signs for its vote extension.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable)]
pub struct CanonicalVoteExtension {
    /// Vote extension bytes
    pub extension: Bytes,
    /// Height the vote was cast at
    pub height: u64,
    /// Round the vote was cast in
    pub round: u32,
    /// Chain id
    pub chain_id: String,
}

/// Bytes signed by the consensus key for `extension` at `(height, round)`.
pub fn vote_extension_sign_bytes(extension: &[u8], height: i64, round: u32, chain_id: &str) -> Vec<u8> {
    alloy_rlp::encode(CanonicalVoteExtension {
        extension: Bytes::copy_from_slice(extension),
        height: height.max(0) as u64,
        round,
        chain_id: chain_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_bytes_bind_every_field() {
        let base = vote_extension_sign_bytes(b"ext", 10, 0, "chain");
        assert_ne!(base, vote_extension_sign_bytes(b"exu", 10, 0, "chain"));
        assert_ne!(base, vote_extension_sign_bytes(b"ext", 11, 0, "chain"));
        assert_ne!(base, vote_extension_sign_bytes(b"ext", 10, 1, "chain"));
        assert_ne!(base, vote_extension_sign_bytes(b"ext", 10, 0, "other"));
    }
}
