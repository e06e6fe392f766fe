//! Deterministic packing of an attestation's public fields
//!
//! The signer hashes exactly this byte layout with Keccak-256, so field order
//! and widths must never change:
//!
//! | Field            | Width    |
//! |------------------|----------|
//! | recipient        | 20       |
//! | request hash     | 32       |
//! | resolves hash    | 32       |
//! | data             | variable |
//! | attConditions    | variable |
//! | timestamp (BE)   | 8        |
//! | additionParams   | variable |
//!
//! No separators or length prefixes are written.

use sha3::{Digest, Keccak256};

use super::types::{Address, Attestation};
use crate::error::{Error, Result};

const HASH_SIZE: usize = 32;
const TIMESTAMP_SIZE: usize = 8;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Pack an attestation into the byte sequence its signature covers
pub fn encode_attestation_for_hashing(attestation: &Attestation) -> Result<Vec<u8>> {
    let recipient: Address = attestation
        .recipient
        .parse()
        .map_err(|e| Error::MalformedPublicData(format!("recipient: {}", e)))?;

    let request_hash = hash_requests(attestation)?;
    let resolves_hash = hash_response_resolves(attestation)?;

    let mut out = Vec::with_capacity(
        Address::LEN
            + HASH_SIZE * 2
            + attestation.data.len()
            + attestation.att_conditions.len()
            + TIMESTAMP_SIZE
            + attestation.addition_params.len(),
    );
    out.extend_from_slice(recipient.as_bytes());
    out.extend_from_slice(&request_hash);
    out.extend_from_slice(&resolves_hash);
    out.extend_from_slice(attestation.data.as_bytes());
    out.extend_from_slice(attestation.att_conditions.as_bytes());
    out.extend_from_slice(&attestation.timestamp.to_be_bytes());
    out.extend_from_slice(attestation.addition_params.as_bytes());
    Ok(out)
}

/// Keccak-256 of the packed encoding
pub fn attestation_message_hash(attestation: &Attestation) -> Result<[u8; 32]> {
    Ok(keccak256(&encode_attestation_for_hashing(attestation)?))
}

fn hash_requests(attestation: &Attestation) -> Result<[u8; 32]> {
    let requests = attestation.request.as_slice();
    if requests.is_empty() {
        return Err(Error::MalformedPublicData("request sequence is empty".into()));
    }

    let joined: String = requests
        .iter()
        .map(|r| format!("{}{}{}{}", r.url, r.header, r.method, r.body))
        .collect();
    Ok(keccak256(joined.as_bytes()))
}

fn hash_response_resolves(attestation: &Attestation) -> Result<[u8; 32]> {
    let groups = attestation.response_resolves.as_slice();
    if groups.is_empty() {
        return Err(Error::MalformedPublicData("responseResolves sequence is empty".into()));
    }

    // A single group object contributes only its first rule
    let joined: String = if attestation.response_resolves.is_many() {
        groups
            .iter()
            .flat_map(|g| g.one_url_response_resolve.iter())
            .map(|r| format!("{}{}{}", r.key_name, r.parse_type, r.parse_path))
            .collect()
    } else {
        let first = groups[0].one_url_response_resolve.first().ok_or_else(|| {
            Error::MalformedPublicData("responseResolves has no resolve entries".into())
        })?;
        format!("{}{}{}", first.key_name, first.parse_type, first.parse_path)
    };
    Ok(keccak256(joined.as_bytes()))
}
