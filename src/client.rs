//! JSON/HTTP client for the attestation network
//!
//! Each method performs a single attempt. Retry and per-call deadlines are
//! applied by the orchestrator; the only loop here is the finalization poll,
//! which re-asks the network while it reports the task as pending.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{AttestParams, AttestationEntry, PlainJsonResponse, SubmitParams, SubmitResult, TaskRef, TaskResult};
use crate::attestation::encoding::keccak256;
use crate::attestation::signature::sign_hash;
use crate::attestation::types::Address;
use crate::config::Identity;
use crate::orchestrator::network::{AttestationNetwork, NetworkError, Session};

/// Delay between finalization checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Finalization checks per verify call
pub const DEFAULT_MAX_POLLS: u32 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    address: Address,
    chain_id: u64,
    timestamp: u64,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_token: String,
}

/// The message a wallet signs to open a session
pub fn session_message(address: &Address, chain_id: u64, timestamp: u64) -> String {
    format!("zktls-session:{}:{}:{}", address, chain_id, timestamp)
}

/// Attestation network client over HTTP
pub struct HttpNetworkClient {
    /// Base URL, without trailing slash
    base_url: String,

    http: reqwest::Client,

    poll_interval: Duration,
    max_polls: u32,
}

impl HttpNetworkClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Use a preconfigured reqwest client (proxy, TLS roots, user agent)
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, token: Option<&str>, body: &B) -> Result<T, NetworkError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .http
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        decode(response).await
    }
}

/// Map non-2xx statuses to `Api` and parse the body
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, NetworkError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(NetworkError::Api { status, message: body });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| NetworkError::Decode(e.to_string()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl AttestationNetwork for HttpNetworkClient {
    async fn init(&self, identity: &Identity) -> Result<Session, NetworkError> {
        let timestamp = now_millis();
        let message = session_message(&identity.address, identity.chain_id, timestamp);
        let signature = sign_hash(&identity.signing_key, &keccak256(message.as_bytes()))
            .map_err(|e| NetworkError::Rejected(e.to_string()))?;

        let body = SessionRequest {
            address: identity.address,
            chain_id: identity.chain_id,
            timestamp,
            signature: format!("0x{}", hex::encode(signature)),
        };
        let response: SessionResponse = self.post_json("/v1/session", None, &body).await?;
        debug!(address = %identity.address, "session established");

        Ok(Session {
            token: response.session_token,
            address: identity.address,
            chain_id: identity.chain_id,
        })
    }

    async fn submit_task(
        &self,
        session: &Session,
        params: &SubmitParams,
    ) -> Result<SubmitResult, NetworkError> {
        self.post_json("/v1/tasks", Some(&session.token), params).await
    }

    async fn attest(
        &self,
        session: &Session,
        params: &AttestParams,
    ) -> Result<Vec<AttestationEntry>, NetworkError> {
        let path = format!("/v1/tasks/{}/attest", params.submit.task_id);
        self.post_json(&path, Some(&session.token), params).await
    }

    async fn verify_and_poll_task_result(
        &self,
        session: &Session,
        task: &TaskRef,
    ) -> Result<TaskResult, NetworkError> {
        let path = format!("/v1/tasks/{}/verify", task.task_id);

        for poll in 1..=self.max_polls {
            let result: TaskResult = self.post_json(&path, Some(&session.token), task).await?;
            if !result.is_pending() {
                return Ok(result);
            }
            debug!(task_id = %task.task_id, poll, status = %result.status, "task still pending");
            if poll < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(NetworkError::NotFinalized(task.task_id.clone()))
    }

    async fn all_json_responses(
        &self,
        session: &Session,
        task_id: &str,
    ) -> Result<Option<Vec<PlainJsonResponse>>, NetworkError> {
        let response = self
            .http
            .get(self.url(&format!("/v1/tasks/{}/responses", task_id)))
            .header("Authorization", format!("Bearer {}", session.token))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }
}
