//! The attestation network as seen by the orchestrator

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::{AttestParams, AttestationEntry, PlainJsonResponse, SubmitParams, SubmitResult, TaskRef, TaskResult};
use crate::attestation::types::Address;
use crate::config::Identity;

/// Failures talking to the network
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Attestor returned no attestation")]
    EmptyAttestation,

    #[error("Task {0} is not finalized yet")]
    NotFinalized(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl NetworkError {
    /// Transient failures that a later attempt may not hit
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Http(e) => !e.is_builder() && !e.is_redirect(),
            NetworkError::Api { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            NetworkError::Decode(_)
            | NetworkError::Timeout(_)
            | NetworkError::EmptyAttestation
            | NetworkError::NotFinalized(_) => true,
            NetworkError::Rejected(_) => false,
        }
    }
}

/// An authenticated session with the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub address: Address,
    pub chain_id: u64,
}

/// Operations the orchestrator sequences
///
/// Implementations perform one attempt per call; retry and deadlines are the
/// orchestrator's job.
#[async_trait]
pub trait AttestationNetwork: Send + Sync {
    /// Establish a session from the wallet key and chain id
    async fn init(&self, identity: &Identity) -> Result<Session, NetworkError>;

    /// Register a new task
    async fn submit_task(
        &self,
        session: &Session,
        params: &SubmitParams,
    ) -> Result<SubmitResult, NetworkError>;

    /// Have the attestor execute the requests and sign the result
    async fn attest(
        &self,
        session: &Session,
        params: &AttestParams,
    ) -> Result<Vec<AttestationEntry>, NetworkError>;

    /// Wait for the task to be finalized and return its result
    async fn verify_and_poll_task_result(
        &self,
        session: &Session,
        task: &TaskRef,
    ) -> Result<TaskResult, NetworkError>;

    /// Raw response payloads captured for a task, if any
    async fn all_json_responses(
        &self,
        session: &Session,
        task_id: &str,
    ) -> Result<Option<Vec<PlainJsonResponse>>, NetworkError>;
}
