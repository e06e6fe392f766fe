//! Error types for the attestation client

use thiserror::Error;

use crate::orchestrator::network::NetworkError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session init failed: {0}")]
    Init(#[source] NetworkError),

    #[error("Task submission failed after {attempts} attempt(s): {source}")]
    Submit { attempts: u32, source: NetworkError },

    #[error("Attestation failed after {attempts} attempt(s): {source}")]
    Attest { attempts: u32, source: NetworkError },

    #[error("Task result polling failed after {attempts} attempt(s): {source}")]
    Poll { attempts: u32, source: NetworkError },

    #[error("Task execution failed: {0}")]
    TaskExecution(#[source] Box<Error>),

    #[error("Attested data does not match extraction rules: {0}")]
    ExtractionMismatch(String),

    #[error("No plain JSON response available for task {0}")]
    MissingPlainResponse(String),

    #[error("Task result mismatch: expected task {expected}, got {actual}")]
    TaskMismatch { expected: String, actual: String },

    #[error("Malformed public data: {0}")]
    MalformedPublicData(String),

    #[error("Invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("Invalid public key format: {0}")]
    InvalidPublicKeyFormat(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Signature recovery failed: {0}")]
    SignatureRecovery(String),

    #[error("Field {field} is {len} bytes, exceeds the {max}-byte window")]
    FieldTooLong { field: &'static str, len: usize, max: usize },

    #[error("Commitment hashing failed: {0}")]
    Commitment(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex decoding failed: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Error {
    /// Unwraps a `TaskExecution` wrapper, returning the underlying cause.
    pub fn root(&self) -> &Error {
        match self {
            Error::TaskExecution(inner) => inner.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
