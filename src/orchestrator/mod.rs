//! Attestation task orchestration
//!
//! Drives one task through the network, strictly in order:
//!
//! ## Step 1: Session
//! Resolves the wallet identity and opens a session. Not retried.
//!
//! ## Step 2: Submit
//! Registers the task and receives its identifying tokens.
//!
//! ## Step 3: Attest
//! Has the attestor execute the requests and sign the extracted data. Request
//! parameters are regenerated before every attempt when a callback is set.
//!
//! ## Step 4: Verify and poll
//! Waits for the network to finalize the task.
//!
//! ## Step 5: Assemble
//! Fetches the raw responses and builds the persistable artifact.
//!
//! Steps 2 to 4 retry independently according to their [`RetryPolicy`].

pub mod network;
pub mod retry;

pub use network::{AttestationNetwork, NetworkError, Session};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy, Retryable};

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{
    AttMode, AttestParams, AttestationEntry, Request, RequestParams, ResponseResolve, SubmitParams,
    SubmitResult, TaskRef, TaskResult, ZkVmRequestData,
};
use crate::assembler;
use crate::config::{Credentials, Identity, TaskOptions};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum Phase {
    Submit,
    Attest,
    Poll,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Submit => "submit",
            Phase::Attest => "attest",
            Phase::Poll => "poll",
        }
    }

    /// Attach the attempt count to a network failure; other errors pass through
    fn fail(self, err: RetryError<Error>) -> Error {
        let attempts = err.attempts();
        match err.into_inner() {
            Error::Network(source) => match self {
                Phase::Submit => Error::Submit { attempts, source },
                Phase::Attest => Error::Attest { attempts, source },
                Phase::Poll => Error::Poll { attempts, source },
            },
            other => other,
        }
    }
}

/// Runs attestation tasks against a network
///
/// Holds no per-task state, so one orchestrator can run tasks concurrently.
pub struct Orchestrator<N> {
    network: N,
    credentials: Credentials,
    options: TaskOptions,
}

impl<N: AttestationNetwork> Orchestrator<N> {
    pub fn new(network: N, credentials: Credentials, options: TaskOptions) -> Self {
        Self {
            network,
            credentials,
            options,
        }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Run one attestation task end to end
    ///
    /// Input and configuration problems are reported as-is before any network
    /// call; anything that fails afterwards is wrapped in
    /// [`Error::TaskExecution`].
    pub async fn run_attestation_task(
        &self,
        requests: Vec<Request>,
        response_resolves: Vec<Vec<ResponseResolve>>,
    ) -> Result<ZkVmRequestData> {
        let params = RequestParams::new(requests, response_resolves)?;
        let identity = self.credentials.resolve()?;

        let started = Instant::now();
        let result = self.execute(&identity, params).await;
        match &result {
            Ok(data) => info!(
                task_id = %data.requestid,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "attestation task finished"
            ),
            Err(error) => warn!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                %error,
                "attestation task failed"
            ),
        }
        result.map_err(|e| Error::TaskExecution(Box::new(e)))
    }

    async fn execute(&self, identity: &Identity, params: RequestParams) -> Result<ZkVmRequestData> {
        let session = self.open_session(identity).await?;
        let submit = self.submit(&session).await?;
        let entries = self.attest(&session, &submit, &params).await?;

        let first = entries
            .first()
            .ok_or_else(|| Error::InvalidInput("attest result is empty".into()))?;
        let task = TaskRef {
            task_id: first.task_id.clone(),
            report_tx_hash: first.report_tx_hash.clone(),
        };
        let task_result = self.poll(&session, &task).await?;

        let phase_start = Instant::now();
        info!(phase = "assemble", task_id = %task.task_id, "phase started");
        let plain = self
            .with_call_timeout(self.network.all_json_responses(&session, &task.task_id))
            .await?;
        let data = assembler::assemble(&task_result, entries, plain)?;
        info!(
            phase = "assemble",
            elapsed_ms = phase_start.elapsed().as_millis() as u64,
            "phase finished"
        );
        Ok(data)
    }

    async fn open_session(&self, identity: &Identity) -> Result<Session> {
        let phase_start = Instant::now();
        info!(phase = "init", address = %identity.address, chain_id = identity.chain_id, "phase started");

        let session = self
            .with_call_timeout(self.network.init(identity))
            .await
            .map_err(Error::Init)?;

        info!(
            phase = "init",
            elapsed_ms = phase_start.elapsed().as_millis() as u64,
            "phase finished"
        );
        Ok(session)
    }

    async fn submit(&self, session: &Session) -> Result<SubmitResult> {
        let phase = Phase::Submit;
        let phase_start = Instant::now();
        info!(phase = phase.label(), "phase started");

        let params = &SubmitParams {
            address: session.address,
        };
        let submit = retry_with_backoff(&self.options.submit_retry, phase.label(), move |attempt| {
            debug!(phase = phase.label(), attempt, "attempt started");
            async move {
                self.with_call_timeout(self.network.submit_task(session, params))
                    .await
                    .map_err(Error::from)
            }
        })
        .await
        .map_err(|e| phase.fail(e))?;

        info!(
            phase = phase.label(),
            task_id = %submit.task_id,
            elapsed_ms = phase_start.elapsed().as_millis() as u64,
            "phase finished"
        );
        Ok(submit)
    }

    async fn attest(
        &self,
        session: &Session,
        submit: &SubmitResult,
        initial: &RequestParams,
    ) -> Result<Vec<AttestationEntry>> {
        let phase = Phase::Attest;
        let phase_start = Instant::now();
        info!(phase = phase.label(), task_id = %submit.task_id, "phase started");

        let entries = retry_with_backoff(&self.options.attest_retry, phase.label(), move |attempt| {
            debug!(phase = phase.label(), attempt, "attempt started");
            async move {
                let params = self.request_params(initial)?;
                let body = self.attest_params(session, submit, &params);

                let entries = with_deadline(
                    Some(self.options.attest_timeout),
                    self.network.attest(session, &body),
                )
                .await?;

                if entries.is_empty() || entries.iter().any(|e| e.attestation.is_none()) {
                    return Err(NetworkError::EmptyAttestation.into());
                }
                check_extraction(&entries, &params)?;
                Ok::<_, Error>(entries)
            }
        })
        .await
        .map_err(|e| phase.fail(e))?;

        info!(
            phase = phase.label(),
            entries = entries.len(),
            elapsed_ms = phase_start.elapsed().as_millis() as u64,
            "phase finished"
        );
        Ok(entries)
    }

    async fn poll(&self, session: &Session, task: &TaskRef) -> Result<TaskResult> {
        let phase = Phase::Poll;
        let phase_start = Instant::now();
        info!(phase = phase.label(), task_id = %task.task_id, "phase started");

        let result = retry_with_backoff(&self.options.poll_retry, phase.label(), move |attempt| {
            debug!(phase = phase.label(), attempt, "attempt started");
            async move {
                self.with_call_timeout(self.network.verify_and_poll_task_result(session, task))
                    .await
                    .map_err(Error::from)
            }
        })
        .await
        .map_err(|e| phase.fail(e))?;

        info!(
            phase = phase.label(),
            status = %result.status,
            elapsed_ms = phase_start.elapsed().as_millis() as u64,
            "phase finished"
        );
        Ok(result)
    }

    /// Fresh parameters for one attest attempt
    fn request_params(&self, initial: &RequestParams) -> Result<RequestParams> {
        match &self.options.request_params_callback {
            Some(callback) => {
                let params = callback();
                params.validate()?;
                debug!(requests = params.requests.len(), "regenerated request parameters");
                Ok(params)
            }
            None => Ok(initial.clone()),
        }
    }

    fn attest_params(&self, session: &Session, submit: &SubmitResult, params: &RequestParams) -> AttestParams {
        AttestParams {
            address: self.options.recipient.unwrap_or(session.address),
            submit: submit.clone(),
            requests: params.requests.clone(),
            response_resolves: params.response_resolves.clone(),
            ssl_cipher: self.options.ssl_cipher.clone(),
            att_mode: AttMode {
                algorithm_type: self.options.algorithm_type.clone(),
            },
            special_task: self.options.special_task.clone(),
            no_proxy: self.options.no_proxy,
            get_all_json_response: "true".to_string(),
        }
    }

    async fn with_call_timeout<T, F>(&self, fut: F) -> std::result::Result<T, NetworkError>
    where
        F: Future<Output = std::result::Result<T, NetworkError>>,
    {
        with_deadline(self.options.call_timeout, fut).await
    }
}

async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> std::result::Result<T, NetworkError>
where
    F: Future<Output = std::result::Result<T, NetworkError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| NetworkError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Each entry's data must carry the keys its own resolves declare, and every
/// key declared in the request parameters must be attested by some entry
fn check_extraction(entries: &[AttestationEntry], params: &RequestParams) -> Result<()> {
    let mut attested: HashSet<String> = HashSet::new();

    for (index, attestation) in entries.iter().filter_map(|e| e.attestation.as_ref()).enumerate() {
        let data: Value = serde_json::from_str(&attestation.data).map_err(|e| {
            Error::ExtractionMismatch(format!("entry {}: attested data is not JSON: {}", index, e))
        })?;
        let object = data.as_object().ok_or_else(|| {
            Error::ExtractionMismatch(format!("entry {}: attested data is not a JSON object", index))
        })?;

        let missing: Vec<&str> = attestation
            .key_names()
            .filter(|key| !object.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::ExtractionMismatch(format!(
                "entry {}: attested data is missing key(s): {}",
                index,
                missing.join(", ")
            )));
        }
        attested.extend(object.keys().cloned());
    }

    let missing: Vec<&str> = params
        .key_names()
        .filter(|key| !attested.contains(*key))
        .collect();
    if !missing.is_empty() {
        return Err(Error::ExtractionMismatch(format!(
            "no attested data carries key(s): {}",
            missing.join(", ")
        )));
    }
    Ok(())
}
