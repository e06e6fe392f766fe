//! # zkTLS Attestation Client
//!
//! Obtains signed attestations that an HTTP response really came from a given
//! web endpoint, and verifies such attestations offline.
//!
//! ## Attestation Tasks
//!
//! [`Orchestrator::run_attestation_task`] drives one task through the
//! attestation network:
//!
//! ### Step 1: Session
//! - Resolves the wallet key and chain id from [`Credentials`]
//! - Opens a session signed by the wallet
//!
//! ### Step 2: Submit, attest, poll
//! - Registers a task and has an attestor execute the requests
//! - Each phase retries transient failures with exponential backoff
//! - Request parameters can be regenerated for every attest attempt
//!
//! ### Step 3: Assemble
//! - Packages the signed attestations and raw responses as [`ZkVmRequestData`]
//!
//! ## Offline Verification
//!
//! [`attestation::verify_artifact`] re-packs the public fields exactly as the
//! attestor did, hashes them with Keccak-256 and recovers the secp256k1
//! signer. Nothing is trusted from the artifact except the signature itself.
//!
//! ## Payment Commitments
//!
//! [`commitment::compute_commitment`] binds an off-chain payment (amount,
//! currency, counterparty, transaction id) into one Poseidon2 hash.
//!
//! ## Example
//!
//! ```rust,ignore
//! use zktls_attest::{Credentials, HttpNetworkClient, Orchestrator, TaskOptions};
//! use zktls_attest::api::{Request, ResponseResolve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = HttpNetworkClient::new("https://attest.example.com");
//!     let credentials = Credentials::new("0x…", 11155111);
//!     let orchestrator = Orchestrator::new(network, credentials, TaskOptions::default());
//!
//!     let data = orchestrator
//!         .run_attestation_task(
//!             vec![Request::get("https://api.example.com/account")],
//!             vec![vec![ResponseResolve::json("hash-of-balances", "$.balances", "SHA256_EX")]],
//!         )
//!         .await?;
//!
//!     // Anyone can check the result offline
//!     let bytes = serde_json::to_vec(&data)?;
//!     let verification = zktls_attest::attestation::verify_artifact(&bytes, None)?;
//!     println!("signed by {}", verification.signer);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod assembler;
pub mod attestation;
pub mod client;
pub mod commitment;
pub mod config;
pub mod error;
pub mod orchestrator;

pub use api::ZkVmRequestData;
pub use attestation::{verify_artifact, verify_attestation, Address, Verification};
pub use client::HttpNetworkClient;
pub use commitment::{compute_commitment, Commitment};
pub use config::{Credentials, TaskOptions};
pub use error::{Error, Result};
pub use orchestrator::{AttestationNetwork, NetworkError, Orchestrator, RetryPolicy};
