//! Attestation verification module
//!
//! Re-derives what the attestor signed and checks who signed it:
//!
//! ## Step 1: Resolve the artifact
//! Accepts exactly one of the formats the network and its tooling emit:
//! - the full task output (`attestationData` + `requestid`)
//! - the wrapped envelope (`public_data`, optional `private_data`)
//! - the raw record (attestation fields at top level plus `signatures`)
//!
//! ## Step 2: Deterministic encoding
//! Packs the public fields into the fixed byte layout (see [`encoding`]) and
//! hashes it with Keccak-256.
//!
//! ## Step 3: Signature recovery
//! Recovers the secp256k1 public key from the 65-byte signature, verifies the
//! signature against it, and derives the signer address.
//!
//! ## Step 4: Hash comparison
//! When the artifact carries the private responses, the SHA-256 of each one
//! must appear among the `hash-of-*` / `uuid-*` digests in the attested data.

pub mod encoding;
pub mod signature;
pub mod types;

// Re-export public types
pub use types::{Address, Attestation, AttestedRequest, OneOrMany, ResponseResolveGroup, SignedAttestation, Verification};

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::api::{AttestationEntry, PlainJsonResponse, ZkVmRequestData};
use crate::error::{Error, Result};

/// Wrapped envelope: what the task output stores under `attestationData`
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationEnvelope {
    #[serde(default)]
    pub verification_type: Option<String>,
    pub public_data: Vec<AttestationEntry>,
    #[serde(default)]
    pub private_data: Option<PrivateEnvelope>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateEnvelope {
    #[serde(default)]
    pub plain_json_response: Vec<PlainJsonResponse>,
}

/// Raw record as returned by the attestor
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttestation {
    #[serde(flatten)]
    pub attestation: Attestation,
    pub signatures: Vec<String>,
}

/// The accepted on-disk/wire artifact formats
#[derive(Debug, Clone)]
pub enum AttestationArtifact {
    Wrapped(AttestationEnvelope),
    Raw(RawAttestation),
}

impl AttestationArtifact {
    /// Resolve raw JSON bytes into one of the accepted formats
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedPublicData(format!("not JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::MalformedPublicData("artifact is not a JSON object".into()))?;

        if let Some(inner) = object.get("attestationData") {
            debug!("detected full task output format");
            return Self::wrapped(inner.clone());
        }

        if object.contains_key("public_data") {
            debug!("detected wrapped attestation format");
            return Self::wrapped(value);
        }

        if object.contains_key("request") && object.contains_key("signatures") {
            debug!("detected raw attestation format");
            let raw: RawAttestation = serde_json::from_value(value)
                .map_err(|e| Error::MalformedPublicData(format!("raw attestation: {}", e)))?;
            return Ok(AttestationArtifact::Raw(raw));
        }

        Err(Error::MalformedPublicData("unknown attestation format".into()))
    }

    fn wrapped(value: Value) -> Result<Self> {
        let envelope: AttestationEnvelope = serde_json::from_value(value)
            .map_err(|e| Error::MalformedPublicData(format!("wrapped attestation: {}", e)))?;
        Ok(AttestationArtifact::Wrapped(envelope))
    }

    /// The attestation and signature that verification runs on
    pub fn primary(&self) -> Result<SignedAttestation> {
        match self {
            AttestationArtifact::Wrapped(envelope) => {
                let entry = envelope
                    .public_data
                    .first()
                    .ok_or_else(|| Error::MalformedPublicData("public_data is empty".into()))?;
                let attestation = entry.attestation.clone().ok_or_else(|| {
                    Error::MalformedPublicData("public_data[0] has no attestation".into())
                })?;
                Ok(SignedAttestation {
                    attestation,
                    signature: entry.signature.clone(),
                })
            }
            AttestationArtifact::Raw(raw) => {
                let signature = raw
                    .signatures
                    .first()
                    .ok_or_else(|| Error::MalformedPublicData("signatures is empty".into()))?;
                Ok(SignedAttestation {
                    attestation: raw.attestation.clone(),
                    signature: signature.clone(),
                })
            }
        }
    }

    /// Verify the primary attestation and compare the private responses
    /// against the digests it attests
    pub fn verify(&self, expected_signer: Option<&Address>) -> Result<Verification> {
        let signed = self.primary()?;
        let mut verification = verify_attestation(&signed, expected_signer)?;
        verification.hash_matches = hash_comparison(&signed.attestation, self.plain_responses());
        Ok(verification)
    }

    /// Private response payloads, when the artifact carries them
    pub fn plain_responses(&self) -> &[PlainJsonResponse] {
        match self {
            AttestationArtifact::Wrapped(envelope) => envelope
                .private_data
                .as_ref()
                .map(|p| p.plain_json_response.as_slice())
                .unwrap_or(&[]),
            AttestationArtifact::Raw(_) => &[],
        }
    }
}

impl From<ZkVmRequestData> for AttestationArtifact {
    fn from(data: ZkVmRequestData) -> Self {
        let inner = data.attestation_data;
        AttestationArtifact::Wrapped(AttestationEnvelope {
            verification_type: Some("HASH_COMPARSION".to_string()),
            public_data: inner.public_data,
            private_data: Some(PrivateEnvelope {
                plain_json_response: inner.private_data.plain_json_response,
            }),
        })
    }
}

/// Verify a signed attestation locally
///
/// This performs the verifier's input preparation:
/// - Encodes the public fields and hashes them with Keccak-256
/// - Recovers the signing key and verifies the signature against it
/// - Derives the signer address and compares it with `expected_signer`
pub fn verify_attestation(
    signed: &SignedAttestation,
    expected_signer: Option<&Address>,
) -> Result<Verification> {
    let message_hash = encoding::attestation_message_hash(&signed.attestation)?;
    let raw_signature = signature::parse_signature_hex(&signed.signature)?;

    let recovered = signature::recover_signer(&message_hash, &raw_signature)?;
    let signer = recovered.address()?;

    let data_sha256 = hex::encode(Sha256::digest(signed.attestation.data.as_bytes()));

    debug!(
        signer = %signer,
        valid = recovered.is_valid,
        "recovered attestation signer"
    );

    Ok(Verification {
        message_hash: format!("0x{}", hex::encode(message_hash)),
        signer,
        public_key: format!("0x{}", hex::encode(recovered.public_key)),
        signature_valid: recovered.is_valid,
        signer_matches: expected_signer.map(|expected| *expected == signer),
        hash_matches: None,
        data_sha256,
        request_urls: signed
            .attestation
            .request_urls()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Resolve an artifact from bytes and verify it
pub fn verify_artifact(bytes: &[u8], expected_signer: Option<&Address>) -> Result<Verification> {
    AttestationArtifact::from_slice(bytes)?.verify(expected_signer)
}

/// Digests committed in the attested data: `hash-of-*` / `uuid-*` keys whose
/// value is a 32-byte hex string
pub fn attested_digests(attestation: &Attestation) -> Vec<String> {
    let Ok(Value::Object(data)) = serde_json::from_str::<Value>(&attestation.data) else {
        return Vec::new();
    };
    data.iter()
        .filter(|(key, _)| key.starts_with("hash-of") || key.starts_with("uuid-"))
        .filter_map(|(_, value)| value.as_str())
        .filter(|value| value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
        .collect()
}

/// `None` without private responses; otherwise whether every response's
/// SHA-256 is one of the attested digests
fn hash_comparison(attestation: &Attestation, responses: &[PlainJsonResponse]) -> Option<bool> {
    if responses.is_empty() {
        return None;
    }
    let digests = attested_digests(attestation);
    let matches = responses.iter().all(|response| {
        let digest = hex::encode(Sha256::digest(response.content.as_bytes()));
        digests.contains(&digest)
    });
    debug!(responses = responses.len(), digests = digests.len(), matches, "compared response hashes");
    Some(matches)
}
