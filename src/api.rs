//! Data exchanged with the attestation network

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attestation::types::{Address, Attestation};
use crate::error::{Error, Result};

/// One HTTP call whose response is to be attested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            header: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(name.into(), value.into());
        self
    }
}

/// Which field of a response to extract, and how to commit to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseResolve {
    pub key_name: String,
    pub parse_type: String,
    pub parse_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub op: String,
}

impl ResponseResolve {
    pub fn json(key_name: impl Into<String>, parse_path: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            parse_type: "json".to_string(),
            parse_path: parse_path.into(),
            op: op.into(),
        }
    }
}

/// Requests paired 1:1, by position, with their extraction rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParams {
    pub requests: Vec<Request>,
    pub response_resolves: Vec<Vec<ResponseResolve>>,
}

impl RequestParams {
    pub fn new(requests: Vec<Request>, response_resolves: Vec<Vec<ResponseResolve>>) -> Result<Self> {
        let params = Self {
            requests,
            response_resolves,
        };
        params.validate()?;
        Ok(params)
    }

    /// Requests and resolves must have equal, non-zero length
    pub fn validate(&self) -> Result<()> {
        if self.requests.is_empty() || self.requests.len() != self.response_resolves.len() {
            return Err(Error::InvalidInput(format!(
                "requests ({}) and responseResolves ({}) must have equal, non-zero length",
                self.requests.len(),
                self.response_resolves.len()
            )));
        }
        Ok(())
    }

    /// Every declared key name, across every request
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.response_resolves
            .iter()
            .flatten()
            .map(|r| r.key_name.as_str())
    }
}

/// Body of the submit call
#[derive(Debug, Clone, Serialize)]
pub struct SubmitParams {
    pub address: Address,
}

/// Opaque tokens identifying an in-flight task
///
/// Fields other than `taskId` are kept as-is and forwarded into the attest call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub task_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttMode {
    pub algorithm_type: String,
}

/// Body of the attest call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestParams {
    pub address: Address,
    #[serde(flatten)]
    pub submit: SubmitResult,
    pub requests: Vec<Request>,
    pub response_resolves: Vec<Vec<ResponseResolve>>,
    pub ssl_cipher: String,
    pub att_mode: AttMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_task: Option<String>,
    pub no_proxy: bool,
    pub get_all_json_response: String,
}

/// One per-request entry of an attest result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub report_tx_hash: String,
}

/// Identifies the task whose finalization is polled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub task_id: String,
    pub report_tx_hash: String,
}

/// Finalization outcome reported by the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl TaskResult {
    /// The network is still working on the task
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "PENDING" | "processing" | "PROCESSING")
    }
}

/// Raw response payload captured during attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainJsonResponse {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationType {
    #[serde(rename = "HASH_COMPARSION")]
    HashComparison,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateData {
    pub plain_json_response: Vec<PlainJsonResponse>,
}

/// Public proof data plus the private response payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationData {
    pub verification_type: VerificationType,
    pub public_data: Vec<AttestationEntry>,
    pub private_data: PrivateData,
}

/// Self-contained, persistable record of a finished attestation task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkVmRequestData {
    #[serde(rename = "attestationData")]
    pub attestation_data: AttestationData,
    pub requestid: String,
}

impl ZkVmRequestData {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
