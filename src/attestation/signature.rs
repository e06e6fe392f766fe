//! secp256k1 signature recovery and address derivation
//!
//! Signatures are 65 bytes: `r (32) || s (32) || v (1)`. The recovery id `v`
//! is accepted in raw (0/1), legacy (27/28) and replay-protected (>= 35) form.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use super::encoding::keccak256;
use super::types::Address;
use crate::error::{Error, Result};

pub const SIGNATURE_LEN: usize = 65;
pub const PUBLIC_KEY_LEN: usize = 65;

const UNCOMPRESSED_PREFIX: u8 = 0x04;

/// Public key recovered from a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredSigner {
    /// Uncompressed SEC1 point (0x04 || x || y)
    pub public_key: [u8; PUBLIC_KEY_LEN],

    /// Whether the signature verifies against the recovered key
    pub is_valid: bool,
}

impl RecoveredSigner {
    pub fn address(&self) -> Result<Address> {
        address_from_public_key(&self.public_key)
    }
}

/// Map a recovery id onto 0 or 1
pub fn normalize_recovery_id(v: u8) -> Result<u8> {
    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        v if v >= 35 => Ok((v - 35) % 2),
        other => Err(Error::InvalidRecoveryId(other)),
    }
}

/// Recover the signer's public key from a prehashed message
///
/// The recovered key is checked against the signature a second time so that
/// `is_valid` reflects a full verification, not just a successful recovery.
pub fn recover_signer(
    message_hash: &[u8; 32],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<RecoveredSigner> {
    let v = signature[64];
    let recovery_id = RecoveryId::from_byte(normalize_recovery_id(v)?)
        .ok_or(Error::InvalidRecoveryId(v))?;

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| Error::SignatureRecovery(format!("invalid r/s: {}", e)))?;

    let key = VerifyingKey::recover_from_prehash(message_hash, &sig, recovery_id)
        .map_err(|e| Error::SignatureRecovery(e.to_string()))?;

    let is_valid = key.verify_prehash(message_hash, &sig).is_ok();

    let point = key.to_encoded_point(false);
    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(point.as_bytes());

    Ok(RecoveredSigner {
        public_key,
        is_valid,
    })
}

/// Derive an address from an uncompressed public key.
///
/// Keccak-256 over the 64 coordinate bytes; the address is the last 20 bytes.
pub fn address_from_public_key(public_key: &[u8]) -> Result<Address> {
    if public_key.len() != PUBLIC_KEY_LEN {
        return Err(Error::InvalidPublicKeyFormat(format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_LEN,
            public_key.len()
        )));
    }

    if public_key[0] != UNCOMPRESSED_PREFIX {
        return Err(Error::InvalidPublicKeyFormat(format!(
            "expected 0x04 prefix, got 0x{:02x}",
            public_key[0]
        )));
    }

    Ok(address_from_coordinates(&public_key[1..]))
}

/// Address controlled by a signing key
pub fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    address_from_coordinates(&point.as_bytes()[1..])
}

/// Last 20 bytes of Keccak-256 over the 64-byte `x || y`
fn address_from_coordinates(xy: &[u8]) -> Address {
    let hash = keccak256(xy);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Parse a hex signature (with or without `0x`) into its 65 raw bytes
pub fn parse_signature_hex(signature: &str) -> Result<[u8; SIGNATURE_LEN]> {
    let trimmed = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(trimmed)
        .map_err(|e| Error::MalformedPublicData(format!("signature: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        Error::MalformedPublicData(format!(
            "signature: expected {} bytes, got {}",
            SIGNATURE_LEN,
            b.len()
        ))
    })
}

/// Sign a prehashed message, encoding `v` as 27/28
pub fn sign_hash(key: &SigningKey, message_hash: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN]> {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(message_hash)
        .map_err(|e| Error::SignatureRecovery(format!("signing failed: {}", e)))?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recovery_id.to_byte() + 27;
    Ok(out)
}
