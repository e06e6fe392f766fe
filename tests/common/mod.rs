#![allow(dead_code)]

use k256::ecdsa::SigningKey;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use zktls_attest::api::{AttestParams, AttestationEntry, Request, ResponseResolve};
use zktls_attest::attestation::encoding::attestation_message_hash;
use zktls_attest::attestation::signature::{address_of, sign_hash};
use zktls_attest::attestation::types::{AttestedRequest, OneOrMany, ResponseResolveGroup};
use zktls_attest::attestation::Attestation;
use zktls_attest::Address;

/// Wallet key used by the task runner in tests (private key 0x...01)
pub const WALLET_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
pub const WALLET_ADDRESS: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";
pub const CHAIN_ID: u64 = 11155111;

pub const ATTESTED_AT: u64 = 1718000000000;

/// Private response the test networks hand back for every task
pub const PLAIN_RESPONSE: &str = r#"{"balances":[{"asset":"BTC","free":"1.0"}]}"#;

/// SHA-256 of [`PLAIN_RESPONSE`], the digest an honest attestor commits to
pub fn response_digest() -> String {
    hex::encode(Sha256::digest(PLAIN_RESPONSE.as_bytes()))
}

pub fn attestor_key() -> SigningKey {
    SigningKey::from_slice(&[0x22u8; 32]).unwrap()
}

pub fn attestor_address() -> Address {
    address_of(&attestor_key())
}

pub fn sign(attestation: &Attestation) -> String {
    let hash = attestation_message_hash(attestation).unwrap();
    let signature = sign_hash(&attestor_key(), &hash).unwrap();
    format!("0x{}", hex::encode(signature))
}

pub fn account_request(url: &str) -> (Vec<Request>, Vec<Vec<ResponseResolve>>) {
    (
        vec![Request::get(url).with_header("X-MBX-APIKEY", "test-key")],
        vec![vec![ResponseResolve::json("hash-of-balances", "$.balances", "SHA256_EX")]],
    )
}

/// The attestation an honest attestor would produce for these parameters
pub fn attestation_for(params: &AttestParams, data: Option<&str>) -> Attestation {
    let request = params
        .requests
        .iter()
        .map(|r| AttestedRequest {
            url: r.url.clone(),
            header: serde_json::to_string(&r.header).unwrap(),
            method: r.method.clone(),
            body: r.body.clone(),
        })
        .collect();

    let response_resolves = params
        .response_resolves
        .iter()
        .map(|group| ResponseResolveGroup {
            one_url_response_resolve: group.clone(),
        })
        .collect();

    let data = match data {
        Some(data) => data.to_string(),
        None => {
            let extracted: Map<String, Value> = params
                .response_resolves
                .iter()
                .flatten()
                .map(|r| (r.key_name.clone(), Value::String(response_digest())))
                .collect();
            Value::Object(extracted).to_string()
        }
    };

    Attestation {
        recipient: params.address.to_hex(),
        request: OneOrMany::Many(request),
        response_resolves: OneOrMany::Many(response_resolves),
        data,
        att_conditions: "[]".to_string(),
        timestamp: ATTESTED_AT,
        addition_params: serde_json::json!({ "algorithmType": params.att_mode.algorithm_type }).to_string(),
    }
}

pub fn signed_entries(params: &AttestParams, data: Option<&str>) -> Vec<AttestationEntry> {
    let attestation = attestation_for(params, data);
    vec![AttestationEntry {
        signature: sign(&attestation),
        attestation: Some(attestation),
        task_id: params.submit.task_id.clone(),
        report_tx_hash: "0xreport".to_string(),
    }]
}

/// One signed entry per request, each attesting only its own request and keys
pub fn per_request_entries(params: &AttestParams) -> Vec<AttestationEntry> {
    params
        .requests
        .iter()
        .zip(&params.response_resolves)
        .flat_map(|(request, resolves)| {
            let mut single = params.clone();
            single.requests = vec![request.clone()];
            single.response_resolves = vec![resolves.clone()];
            signed_entries(&single, None)
        })
        .collect()
}

/// A standalone raw attestation record, as written by the attestor
pub fn raw_artifact() -> Value {
    let attestation = Attestation {
        recipient: WALLET_ADDRESS.to_string(),
        request: OneOrMany::One(AttestedRequest {
            url: "https://api.example.com/account".to_string(),
            header: String::new(),
            method: "GET".to_string(),
            body: String::new(),
        }),
        response_resolves: OneOrMany::One(ResponseResolveGroup {
            one_url_response_resolve: vec![ResponseResolve::json("hash-of-balances", "$.balances", "")],
        }),
        data: r#"{"hash-of-balances":"ab12"}"#.to_string(),
        att_conditions: "[]".to_string(),
        timestamp: ATTESTED_AT,
        addition_params: String::new(),
    };
    let signature = sign(&attestation);
    let mut value = serde_json::to_value(&attestation).unwrap();
    value["signatures"] = serde_json::json!([signature]);
    value
}

/// A wrapped artifact attesting [`PLAIN_RESPONSE`]'s digest, carrying `content`
/// as its private response
pub fn wrapped_artifact(content: &str) -> Value {
    let mut raw = raw_artifact();
    raw["data"] = Value::String(serde_json::json!({ "hash-of-balances": response_digest() }).to_string());
    raw.as_object_mut().unwrap().remove("signatures");

    let attestation: Attestation = serde_json::from_value(raw).unwrap();
    serde_json::json!({
        "verification_type": "HASH_COMPARSION",
        "public_data": [{ "signature": sign(&attestation), "attestation": attestation }],
        "private_data": { "plain_json_response": [{ "id": "0", "content": content }] }
    })
}
