//! Commitment over an off-chain payment
//!
//! Binds (amount, currency, counterparty, transaction id) into one BN254
//! scalar that an escrow condition can be checked against. The escrow circuit
//! recomputes the same value, so the construction is fixed:
//!
//! | Step | Input | Hash |
//! |------|-------|------|
//! | field hash | 64 elements, one per byte of the zero-padded UTF-8 window | Poseidon2 |
//! | commitment | amount, currency, counterparty, tx id hashes, in that order | Poseidon2 |
//!
//! Poseidon2 here is the Noir/Barretenberg fixed-length sponge: width 4,
//! rate 3, capacity element seeded with `len << 64`, squeezing `state[0]`.

use std::fmt;

use acir::FieldElement;
use bn254_blackbox_solver::poseidon2_permutation;

use crate::error::{Error, Result};

/// Byte window every field is padded into
pub const FIELD_WINDOW: usize = 64;

const RATE: usize = 3;
const STATE_WIDTH: usize = RATE + 1;

/// A commitment value, opaque to everything but equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment([u8; 32]);

impl Commitment {
    /// Big-endian 32-byte encoding
    pub fn to_bytes_be(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the commitment for a payment
pub fn compute_commitment(
    amount: &str,
    currency: &str,
    counterparty: &str,
    tx_id: &str,
) -> Result<Commitment> {
    let fields = [
        hash_bounded("amount", amount)?,
        hash_bounded("currency", currency)?,
        hash_bounded("counterparty", counterparty)?,
        hash_bounded("tx_id", tx_id)?,
    ];
    let digest = poseidon2_hash(&fields)?;
    Ok(Commitment(to_bytes32(digest)))
}

/// Hash one string through the fixed 64-byte window, one field element per byte
fn hash_bounded(field: &'static str, value: &str) -> Result<FieldElement> {
    let bytes = value.as_bytes();
    if bytes.len() > FIELD_WINDOW {
        return Err(Error::FieldTooLong {
            field,
            len: bytes.len(),
            max: FIELD_WINDOW,
        });
    }

    let mut window = [0u8; FIELD_WINDOW];
    window[..bytes.len()].copy_from_slice(bytes);

    let elements: Vec<FieldElement> = window.iter().map(|b| FieldElement::from(*b as u128)).collect();
    poseidon2_hash(&elements)
}

/// Fixed-length Poseidon2 sponge over a non-empty input
fn poseidon2_hash(inputs: &[FieldElement]) -> Result<FieldElement> {
    let mut state = [FieldElement::from(0u128); STATE_WIDTH];
    state[RATE] = FieldElement::from((inputs.len() as u128) << 64);

    for chunk in inputs.chunks(RATE) {
        for (slot, input) in state.iter_mut().zip(chunk) {
            *slot = *slot + *input;
        }
        state = permute(&state)?;
    }
    Ok(state[0])
}

fn permute(state: &[FieldElement; STATE_WIDTH]) -> Result<[FieldElement; STATE_WIDTH]> {
    let out = poseidon2_permutation(state, STATE_WIDTH as u32)
        .map_err(|e| Error::Commitment(e.to_string()))?;
    out.try_into().map_err(|v: Vec<FieldElement>| {
        Error::Commitment(format!("permutation returned {} elements", v.len()))
    })
}

fn to_bytes32(value: FieldElement) -> [u8; 32] {
    let bytes = value.to_be_bytes();
    let mut out = [0u8; 32];
    let take = bytes.len().min(32);
    out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}
