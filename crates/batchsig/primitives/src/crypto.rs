//! secp256k1 signing, verification and address derivation

use alloy_primitives::{keccak256, Address, Bytes, B256};
use k256::ecdsa::{
    signature::{
        hazmat::{PrehashSigner, PrehashVerifier},
        Signer, Verifier,
    },
    RecoveryId, Signature, SigningKey, VerifyingKey,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a compact `r ‖ s` signature.
pub const COMPACT_SIGNATURE_LEN: usize = 64;

/// Length of a recoverable `r ‖ s ‖ v` signature.
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

/// Crypto errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Public key bytes are not a valid SEC1 secp256k1 point
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Private key bytes are not a valid scalar
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Signature bytes are malformed
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// Signature does not verify against the key
    #[error("signature verification failed")]
    VerificationFailed,

    /// Signing failed
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Signature scheme a validator key is registered under.
///
/// The discriminant is the key index in the public-key registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ProvingScheme {
    /// ECDSA over secp256k1
    Secp256k1 = 0,
}

impl ProvingScheme {
    /// Registry index of the scheme
    pub const fn index(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ProvingScheme {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Secp256k1),
            other => Err(other),
        }
    }
}

/// Decode a SEC1 (compressed or uncompressed) public key.
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_sec1_bytes(bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Ethereum address of a key: last 20 bytes of keccak256 over the uncompressed point.
pub fn eth_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Ethereum address of SEC1-encoded public key bytes.
pub fn eth_address_from_public_key(bytes: &[u8]) -> Result<Address, CryptoError> {
    decode_public_key(bytes).map(|key| eth_address(&key))
}

fn compact_signature(sig: &[u8]) -> Result<Signature, CryptoError> {
    let bytes = sig.get(..COMPACT_SIGNATURE_LEN).ok_or_else(|| {
        CryptoError::InvalidSignature(format!("expected at least {COMPACT_SIGNATURE_LEN} bytes, got {}", sig.len()))
    })?;
    Signature::from_slice(bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
}

/// Verify a batch signature (first 64 bytes of `sig`) over `batch_id` as a prehash.
pub fn verify_batch_signature(public_key: &[u8], batch_id: B256, sig: &[u8]) -> Result<(), CryptoError> {
    let key = decode_public_key(public_key)?;
    let signature = compact_signature(sig)?;
    key.verify_prehash(batch_id.as_slice(), &signature).map_err(|_| CryptoError::VerificationFailed)
}

/// Recover the Ethereum addresses that could have produced `sig` over `hash`.
///
/// A 65-byte signature carries its recovery id (`v` in `{0, 1, 27, 28}`) and yields
/// one address; a 64-byte signature yields one candidate per recovery id.
pub fn recover_signer_candidates(hash: B256, sig: &[u8]) -> Result<Vec<Address>, CryptoError> {
    let signature = compact_signature(sig)?;
    let recovery_ids: Vec<RecoveryId> = match sig.len() {
        COMPACT_SIGNATURE_LEN => (0u8..2).filter_map(RecoveryId::from_byte).collect(),
        RECOVERABLE_SIGNATURE_LEN => {
            let v = sig[COMPACT_SIGNATURE_LEN];
            let normalized = if v >= 27 { v - 27 } else { v };
            let id = RecoveryId::from_byte(normalized)
                .filter(|_| normalized < 2)
                .ok_or_else(|| CryptoError::InvalidSignature(format!("invalid recovery id {v}")))?;
            vec![id]
        }
        len => {
            return Err(CryptoError::InvalidSignature(format!(
                "expected {COMPACT_SIGNATURE_LEN} or {RECOVERABLE_SIGNATURE_LEN} bytes, got {len}"
            )))
        }
    };

    let candidates: Vec<Address> = recovery_ids
        .into_iter()
        .filter_map(|id| VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, id).ok())
        .map(|key| eth_address(&key))
        .collect();

    if candidates.is_empty() {
        return Err(CryptoError::VerificationFailed);
    }
    Ok(candidates)
}

/// Verify a consensus-key signature (ECDSA over SHA-256 of `msg`).
pub fn verify_consensus_signature(public_key: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    let key = decode_public_key(public_key)?;
    if sig.len() != COMPACT_SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature(format!(
            "expected {COMPACT_SIGNATURE_LEN} bytes, got {}",
            sig.len()
        )));
    }
    let signature = compact_signature(sig)?;
    key.verify(msg, &signature).map_err(|_| CryptoError::VerificationFailed)
}

/// Produces the batch signatures a validator puts in its vote extension.
pub trait BatchSigner: Send + Sync {
    /// Sign a batch id, returning a 64-byte compact signature.
    fn sign_batch_id(&self, batch_id: B256) -> Result<Bytes, CryptoError>;

    /// SEC1-compressed public key of the signer
    fn public_key(&self) -> Bytes;
}

/// In-process secp256k1 key.
#[derive(Clone)]
pub struct Secp256k1Signer {
    key: SigningKey,
}

impl std::fmt::Debug for Secp256k1Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Signer").field("address", &self.address()).finish_non_exhaustive()
    }
}

impl Secp256k1Signer {
    /// Wrap a signing key
    pub const fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Build from 32 raw private-key bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes).map(Self::new).map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// Verifying half of the key
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }

    /// Ethereum address of the key
    pub fn address(&self) -> Address {
        eth_address(self.verifying_key())
    }

    /// SEC1-uncompressed public key (65 bytes)
    pub fn uncompressed_public_key(&self) -> Bytes {
        Bytes::copy_from_slice(self.verifying_key().to_encoded_point(false).as_bytes())
    }

    /// Sign `hash` as a prehash, returning `r ‖ s ‖ v` with `v` in `{0, 1}`.
    pub fn sign_recoverable(&self, hash: B256) -> Result<Bytes, CryptoError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        let mut out = Vec::with_capacity(RECOVERABLE_SIGNATURE_LEN);
        out.extend_from_slice(signature.to_bytes().as_slice());
        out.push(recovery_id.to_byte());
        Ok(out.into())
    }

    /// Sign `msg` with ECDSA over SHA-256, as consensus keys do.
    pub fn sign_message(&self, msg: &[u8]) -> Bytes {
        let signature: Signature = self.key.sign(msg);
        Bytes::copy_from_slice(signature.to_bytes().as_slice())
    }
}

impl BatchSigner for Secp256k1Signer {
    fn sign_batch_id(&self, batch_id: B256) -> Result<Bytes, CryptoError> {
        let signature: Signature = self
            .key
            .sign_prehash(batch_id.as_slice())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(Bytes::copy_from_slice(signature.to_bytes().as_slice()))
    }

    fn public_key(&self) -> Bytes {
        Bytes::copy_from_slice(self.verifying_key().to_encoded_point(true).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn signer(seed: u8) -> Secp256k1Signer {
        Secp256k1Signer::from_slice(&[seed; 32]).unwrap()
    }

    #[test]
    fn test_batch_signature_roundtrip() {
        let signer = signer(7);
        let batch_id = B256::repeat_byte(0x42);
        let sig = signer.sign_batch_id(batch_id).unwrap();

        assert_eq!(sig.len(), COMPACT_SIGNATURE_LEN);
        assert!(verify_batch_signature(&signer.public_key(), batch_id, &sig).is_ok());
        assert!(verify_batch_signature(&signer.uncompressed_public_key(), batch_id, &sig).is_ok());
    }

    #[test]
    fn test_batch_signature_wrong_key_fails() {
        let batch_id = B256::repeat_byte(0x42);
        let sig = signer(7).sign_batch_id(batch_id).unwrap();

        assert_matches!(
            verify_batch_signature(&signer(8).public_key(), batch_id, &sig),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_short_signature_rejected() {
        let signer = signer(7);
        assert_matches!(
            verify_batch_signature(&signer.public_key(), B256::ZERO, &[1u8; 10]),
            Err(CryptoError::InvalidSignature(_))
        );
    }

    #[test]
    fn test_recover_from_compact_and_recoverable() {
        let signer = signer(9);
        let hash = B256::repeat_byte(0x01);

        let recoverable = signer.sign_recoverable(hash).unwrap();
        assert_eq!(recover_signer_candidates(hash, &recoverable).unwrap(), vec![signer.address()]);

        let compact = signer.sign_batch_id(hash).unwrap();
        assert!(recover_signer_candidates(hash, &compact).unwrap().contains(&signer.address()));

        let mut eth_style = recoverable.to_vec();
        eth_style[64] += 27;
        assert_eq!(recover_signer_candidates(hash, &eth_style).unwrap(), vec![signer.address()]);
    }

    #[test]
    fn test_consensus_signature() {
        let signer = signer(3);
        let sig = signer.sign_message(b"vote extension");

        assert!(verify_consensus_signature(&signer.public_key(), b"vote extension", &sig).is_ok());
        assert!(verify_consensus_signature(&signer.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn test_proving_scheme_index() {
        assert_eq!(ProvingScheme::Secp256k1.index(), 0);
        assert_eq!(ProvingScheme::try_from(0), Ok(ProvingScheme::Secp256k1));
        assert_eq!(ProvingScheme::try_from(3), Err(3));
    }
}
