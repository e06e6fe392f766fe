//! Core types for attestation records

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::api::ResponseResolve;
use crate::error::Error;

/// 20-byte account address, rendered as `0x`-prefixed lowercase hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse from hex, with or without the `0x` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let bytes = hex::decode(trimmed)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidAddress(format!("expected {} bytes, got {}", Self::LEN, b.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A field that the attestation network emits either as a single object or
/// as a sequence of objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => std::slice::from_ref(item),
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }
}

/// The request as it appears inside a signed attestation.
///
/// `header` is the serialized header string the attestor signed over, not a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestedRequest {
    pub url: String,
    #[serde(default)]
    pub header: String,
    pub method: String,
    #[serde(default)]
    pub body: String,
}

/// Extraction rules for one attested URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseResolveGroup {
    pub one_url_response_resolve: Vec<ResponseResolve>,
}

/// Public, signed part of an attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub recipient: String,
    pub request: OneOrMany<AttestedRequest>,
    pub response_resolves: OneOrMany<ResponseResolveGroup>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub att_conditions: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    #[serde(default)]
    pub addition_params: String,
}

impl Attestation {
    /// URLs of every attested request, in order
    pub fn request_urls(&self) -> Vec<&str> {
        self.request.as_slice().iter().map(|r| r.url.as_str()).collect()
    }

    /// Key names declared by the attested extraction rules
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.response_resolves
            .as_slice()
            .iter()
            .flat_map(|group| group.one_url_response_resolve.iter())
            .map(|r| r.key_name.as_str())
    }
}

/// Timestamps arrive as JSON numbers or as decimal strings
fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// An attestation together with its hex-encoded 65-byte signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAttestation {
    pub attestation: Attestation,
    pub signature: String,
}

/// Result of local signature verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// Keccak-256 of the deterministic encoding (0x-prefixed hex)
    pub message_hash: String,

    /// Address derived from the recovered public key
    pub signer: Address,

    /// Uncompressed recovered public key (0x04 || x || y), hex-encoded
    pub public_key: String,

    /// Whether the signature verifies against the recovered key
    pub signature_valid: bool,

    /// Set when an expected signer was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_matches: Option<bool>,

    /// Set when the artifact carries private responses: whether each one's
    /// SHA-256 is among the attested digests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_matches: Option<bool>,

    /// SHA-256 of the attested `data` payload (hex)
    pub data_sha256: String,

    pub request_urls: Vec<String>,
}

impl Verification {
    /// Signature verifies, and neither the expected signer nor the response
    /// hashes (when present) disagree
    pub fn is_trusted(&self) -> bool {
        self.signature_valid && self.signer_matches.unwrap_or(true) && self.hash_matches.unwrap_or(true)
    }
}
