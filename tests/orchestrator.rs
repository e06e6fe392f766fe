mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;
use tokio::time::Instant;

use zktls_attest::api::{
    AttestParams, AttestationEntry, PlainJsonResponse, Request, RequestParams, ResponseResolve, SubmitParams,
    SubmitResult, TaskRef, TaskResult,
};
use zktls_attest::config::Identity;
use zktls_attest::orchestrator::Session;
use zktls_attest::{
    verify_artifact, Address, AttestationNetwork, Credentials, Error, NetworkError, Orchestrator, TaskOptions,
};

use common::*;

/// Scripted network: fails the first N calls of a phase, then behaves
#[derive(Default)]
struct Script {
    init_fails: bool,
    submit_failures: u32,
    submit_status: Option<u16>,
    empty_attestations: u32,
    attested_data: Option<String>,
    per_request_entries: bool,
    attest_hangs: bool,
    never_finalized: bool,
    no_plain_responses: bool,
}

#[derive(Default)]
struct MockNetwork {
    script: Script,
    init_calls: AtomicU32,
    submit_calls: AtomicU32,
    attest_calls: AtomicU32,
    poll_calls: AtomicU32,
    attest_bodies: Mutex<Vec<AttestParams>>,
}

impl MockNetwork {
    fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }
}

#[async_trait]
impl AttestationNetwork for MockNetwork {
    async fn init(&self, identity: &Identity) -> Result<Session, NetworkError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.init_fails {
            return Err(NetworkError::Api {
                status: 401,
                message: "bad session signature".into(),
            });
        }
        Ok(Session {
            token: "session-token".into(),
            address: identity.address,
            chain_id: identity.chain_id,
        })
    }

    async fn submit_task(
        &self,
        _session: &Session,
        _params: &SubmitParams,
    ) -> Result<SubmitResult, NetworkError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.script.submit_failures {
            return Err(NetworkError::Api {
                status: self.script.submit_status.unwrap_or(503),
                message: "unavailable".into(),
            });
        }
        let mut extra = Map::new();
        extra.insert("taskTxHash".into(), "0xabc".into());
        Ok(SubmitResult {
            task_id: "task-1".into(),
            extra,
        })
    }

    async fn attest(
        &self,
        _session: &Session,
        params: &AttestParams,
    ) -> Result<Vec<AttestationEntry>, NetworkError> {
        let call = self.attest_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.attest_bodies.lock().unwrap().push(params.clone());

        if self.script.attest_hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if call <= self.script.empty_attestations {
            return Ok(vec![AttestationEntry {
                attestation: None,
                signature: String::new(),
                task_id: params.submit.task_id.clone(),
                report_tx_hash: String::new(),
            }]);
        }
        if self.script.per_request_entries {
            return Ok(per_request_entries(params));
        }
        Ok(signed_entries(params, self.script.attested_data.as_deref()))
    }

    async fn verify_and_poll_task_result(
        &self,
        _session: &Session,
        task: &TaskRef,
    ) -> Result<TaskResult, NetworkError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.never_finalized {
            return Err(NetworkError::NotFinalized(task.task_id.clone()));
        }
        Ok(TaskResult {
            task_id: task.task_id.clone(),
            status: "SUCCESS".into(),
            details: Map::new(),
        })
    }

    async fn all_json_responses(
        &self,
        _session: &Session,
        task_id: &str,
    ) -> Result<Option<Vec<PlainJsonResponse>>, NetworkError> {
        if self.script.no_plain_responses {
            return Ok(None);
        }
        Ok(Some(vec![PlainJsonResponse {
            id: task_id.to_string(),
            content: PLAIN_RESPONSE.into(),
        }]))
    }
}

fn credentials() -> Credentials {
    Credentials::new(WALLET_KEY, CHAIN_ID)
}

fn orchestrator(script: Script) -> Orchestrator<MockNetwork> {
    Orchestrator::new(MockNetwork::new(script), credentials(), TaskOptions::default())
}

#[tokio::test(start_paused = true)]
async fn submit_retry_then_verifiable_artifact() {
    let orchestrator = orchestrator(Script {
        submit_failures: 1,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");

    let start = Instant::now();
    let data = orchestrator.run_attestation_task(requests, resolves).await.unwrap();

    // One failed submit, one 1000 ms backoff, everything else immediate
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
    assert_eq!(orchestrator.network().submit_calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(data.requestid, "task-1");
    assert_eq!(data.attestation_data.private_data.plain_json_response.len(), 1);

    let bytes = serde_json::to_vec(&data).unwrap();
    let verification = verify_artifact(&bytes, Some(&attestor_address())).unwrap();
    assert!(verification.is_trusted());
    assert_eq!(verification.hash_matches, Some(true));
    assert_eq!(verification.request_urls, vec!["https://api.example.com/account"]);
}

#[tokio::test(start_paused = true)]
async fn one_entry_per_request_is_accepted() {
    let orchestrator = orchestrator(Script {
        per_request_entries: true,
        ..Default::default()
    });
    let requests = vec![
        Request::get("https://api.example.com/account"),
        Request::get("https://api.example.com/orders"),
    ];
    let resolves = vec![
        vec![ResponseResolve::json("hash-of-balances", "$.balances", "SHA256_EX")],
        vec![ResponseResolve::json("hash-of-orders", "$.orders", "SHA256_EX")],
    ];

    let data = orchestrator.run_attestation_task(requests, resolves).await.unwrap();

    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 1);
    let entries = &data.attestation_data.public_data;
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[1].attestation.as_ref().unwrap().request_urls(),
        vec!["https://api.example.com/orders"]
    );

    let verification = verify_artifact(&serde_json::to_vec(&data).unwrap(), Some(&attestor_address())).unwrap();
    assert!(verification.is_trusted());
}

#[tokio::test(start_paused = true)]
async fn unavailable_submit_exhausts_submit_budget() {
    let orchestrator = orchestrator(Script {
        submit_failures: u32::MAX,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");

    let start = Instant::now();
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(
        err.root(),
        Error::Submit {
            attempts: 6,
            source: NetworkError::Api { status: 503, .. }
        }
    ));
    assert_eq!(orchestrator.network().submit_calls.load(Ordering::SeqCst), 6);
    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 0);
    // 1 + 2 + 4 + 8 + 16 seconds
    assert_eq!(start.elapsed(), Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn hung_attest_times_out_and_is_retried() {
    let orchestrator = orchestrator(Script {
        attest_hangs: true,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");

    let start = Instant::now();
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(
        err.root(),
        Error::Attest {
            attempts: 4,
            source: NetworkError::Timeout(limit)
        } if *limit == Duration::from_millis(300_000)
    ));
    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 4);
    assert_eq!(orchestrator.network().poll_calls.load(Ordering::SeqCst), 0);
    // Four 300 s deadlines plus 1 + 2 + 4 s of backoff
    assert_eq!(start.elapsed(), Duration::from_secs(4 * 300 + 7));
}

#[tokio::test(start_paused = true)]
async fn attest_params_carry_options_and_submit_tokens() {
    let orchestrator = orchestrator(Script::default());
    let (requests, resolves) = account_request("https://api.example.com/account");
    orchestrator.run_attestation_task(requests, resolves).await.unwrap();

    let bodies = orchestrator.network().attest_bodies.lock().unwrap();
    let body = serde_json::to_value(&bodies[0]).unwrap();
    assert_eq!(body["address"], WALLET_ADDRESS);
    assert_eq!(body["taskId"], "task-1");
    assert_eq!(body["taskTxHash"], "0xabc");
    assert_eq!(body["sslCipher"], "ECDHE-RSA-AES128-GCM-SHA256");
    assert_eq!(body["attMode"]["algorithmType"], "mpctls");
    assert_eq!(body["noProxy"], true);
    assert_eq!(body["getAllJsonResponse"], "true");
}

#[tokio::test(start_paused = true)]
async fn special_task_is_forwarded() {
    let orchestrator = Orchestrator::new(
        MockNetwork::default(),
        credentials(),
        TaskOptions::default().with_special_task("dvc"),
    );
    let (requests, resolves) = account_request("https://api.example.com/account");
    orchestrator.run_attestation_task(requests, resolves).await.unwrap();

    let bodies = orchestrator.network().attest_bodies.lock().unwrap();
    let body = serde_json::to_value(&bodies[0]).unwrap();
    assert_eq!(body["specialTask"], "dvc");
}

#[tokio::test(start_paused = true)]
async fn recipient_override_is_attested() {
    let recipient: Address = "0x810b7bacefd5ba495bb688bbfd2501c904036ab7".parse().unwrap();
    let orchestrator = Orchestrator::new(
        MockNetwork::default(),
        credentials(),
        TaskOptions::default().with_recipient(recipient),
    );
    let (requests, resolves) = account_request("https://api.example.com/account");
    let data = orchestrator.run_attestation_task(requests, resolves).await.unwrap();

    let attestation = data.attestation_data.public_data[0].attestation.as_ref().unwrap();
    assert_eq!(attestation.recipient, recipient.to_hex());
}

#[tokio::test(start_paused = true)]
async fn callback_regenerates_params_on_every_attest_attempt() {
    let generated = Arc::new(AtomicU32::new(0));
    let counter = generated.clone();
    let options = TaskOptions::default().with_request_params_callback(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (requests, resolves) = account_request(&format!("https://api.example.com/account?nonce={}", n));
        RequestParams::new(requests, resolves).unwrap()
    });

    let orchestrator = Orchestrator::new(
        MockNetwork::new(Script {
            empty_attestations: 2,
            ..Default::default()
        }),
        credentials(),
        options,
    );
    let (requests, resolves) = account_request("https://api.example.com/account");

    let start = Instant::now();
    let data = orchestrator.run_attestation_task(requests, resolves).await.unwrap();

    assert_eq!(generated.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 3);
    // 1000 + 2000 ms of attest backoff
    assert_eq!(start.elapsed(), Duration::from_millis(3000));

    let urls: Vec<String> = orchestrator
        .network()
        .attest_bodies
        .lock()
        .unwrap()
        .iter()
        .map(|b| b.requests[0].url.clone())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://api.example.com/account?nonce=1",
            "https://api.example.com/account?nonce=2",
            "https://api.example.com/account?nonce=3",
        ]
    );

    let attestation = data.attestation_data.public_data[0].attestation.as_ref().unwrap();
    assert_eq!(attestation.request_urls(), vec!["https://api.example.com/account?nonce=3"]);
}

#[tokio::test(start_paused = true)]
async fn empty_attestations_exhaust_attest_budget() {
    let orchestrator = orchestrator(Script {
        empty_attestations: u32::MAX,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(err, Error::TaskExecution(_)));
    assert!(matches!(
        err.root(),
        Error::Attest {
            attempts: 4,
            source: NetworkError::EmptyAttestation
        }
    ));
    assert_eq!(orchestrator.network().poll_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unfinalized_task_exhausts_poll_budget() {
    let orchestrator = orchestrator(Script {
        never_finalized: true,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");

    let start = Instant::now();
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(err.root(), Error::Poll { attempts: 6, .. }));
    assert_eq!(orchestrator.network().poll_calls.load(Ordering::SeqCst), 6);
    // 1 + 2 + 4 + 8 + 16 seconds
    assert_eq!(start.elapsed(), Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn client_error_on_submit_is_not_retried() {
    let orchestrator = orchestrator(Script {
        submit_failures: 1,
        submit_status: Some(400),
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(
        err.root(),
        Error::Submit {
            attempts: 1,
            source: NetworkError::Api { status: 400, .. }
        }
    ));
    assert_eq!(orchestrator.network().submit_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn extraction_mismatch_is_not_retried() {
    let orchestrator = orchestrator(Script {
        attested_data: Some(r#"{"unexpected":"value"}"#.into()),
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(err.root(), Error::ExtractionMismatch(_)));
    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn init_failure_is_fatal() {
    let orchestrator = orchestrator(Script {
        init_fails: true,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(err.root(), Error::Init(_)));
    assert_eq!(orchestrator.network().init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.network().submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_plain_responses() {
    let orchestrator = orchestrator(Script {
        no_plain_responses: true,
        ..Default::default()
    });
    let (requests, resolves) = account_request("https://api.example.com/account");
    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();

    assert!(matches!(err.root(), Error::MissingPlainResponse(id) if id == "task-1"));
}

#[tokio::test(start_paused = true)]
async fn invalid_input_fails_before_network() {
    let orchestrator = orchestrator(Script::default());
    let (requests, _) = account_request("https://api.example.com/account");

    let err = orchestrator.run_attestation_task(requests, vec![]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = orchestrator.run_attestation_task(vec![], vec![]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert_eq!(orchestrator.network().init_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_fail_before_network() {
    let orchestrator = Orchestrator::new(MockNetwork::default(), Credentials::default(), TaskOptions::default());
    let (requests, resolves) = account_request("https://api.example.com/account");

    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();
    assert!(matches!(err, Error::MissingConfig("PRIVATE_KEY")));
    assert_eq!(orchestrator.network().init_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_callback_output_aborts_attest() {
    let options = TaskOptions::default().with_request_params_callback(|| RequestParams {
        requests: vec![],
        response_resolves: vec![],
    });
    let orchestrator = Orchestrator::new(MockNetwork::default(), credentials(), options);
    let (requests, resolves) = account_request("https://api.example.com/account");

    let err = orchestrator.run_attestation_task(requests, resolves).await.unwrap_err();
    assert!(matches!(err, Error::TaskExecution(_)));
    assert!(matches!(err.root(), Error::InvalidInput(_)));
    assert_eq!(orchestrator.network().attest_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_tasks_are_independent() {
    let orchestrator = orchestrator(Script::default());
    let (requests, resolves) = account_request("https://api.example.com/account");

    let (a, b) = tokio::join!(
        orchestrator.run_attestation_task(requests.clone(), resolves.clone()),
        orchestrator.run_attestation_task(requests, resolves),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(orchestrator.network().init_calls.load(Ordering::SeqCst), 2);
}
