//! Credentials and per-task options
//!
//! Everything the orchestrator needs is passed in explicitly; the core never
//! reads the environment. [`Credentials::from_env`] exists for the binary,
//! which resolves credentials before handing them over.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::SigningKey;

use crate::api::RequestParams;
use crate::attestation::signature::address_of;
use crate::attestation::types::Address;
use crate::error::{Error, Result};
use crate::orchestrator::retry::RetryPolicy;

/// Default TLS cipher suite the attestor negotiates with the target
pub const DEFAULT_SSL_CIPHER: &str = "ECDHE-RSA-AES128-GCM-SHA256";

/// Default attestation mode
pub const DEFAULT_ALGORITHM_TYPE: &str = "mpctls";

/// Upper bound for a single attest attempt
pub const ATTEST_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Upper bound for every other network call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

pub const ENV_PRIVATE_KEY: &str = "PRIVATE_KEY";
pub const ENV_CHAIN_ID: &str = "CHAIN_ID";

/// Wallet and chain credentials, possibly incomplete
#[derive(Clone, Default)]
pub struct Credentials {
    /// Hex-encoded secp256k1 private key
    pub private_key: Option<String>,
    pub chain_id: Option<u64>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl Credentials {
    pub fn new(private_key: impl Into<String>, chain_id: u64) -> Self {
        Self {
            private_key: Some(private_key.into()),
            chain_id: Some(chain_id),
        }
    }

    /// Read `PRIVATE_KEY` and `CHAIN_ID` from the process environment
    ///
    /// Unset or blank variables stay `None` and surface as
    /// [`Error::MissingConfig`] on [`resolve`](Self::resolve); a chain id that
    /// is set but not a number is rejected here.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let chain_id = non_empty(ENV_CHAIN_ID)
            .map(|v| {
                v.trim().parse::<u64>().map_err(|e| {
                    Error::InvalidConfig(format!("{} is not a number ({:?}): {}", ENV_CHAIN_ID, v, e))
                })
            })
            .transpose()?;
        Ok(Self {
            private_key: non_empty(ENV_PRIVATE_KEY),
            chain_id,
        })
    }

    /// Turn credentials into a usable identity
    pub fn resolve(&self) -> Result<Identity> {
        let private_key = self
            .private_key
            .as_deref()
            .ok_or(Error::MissingConfig(ENV_PRIVATE_KEY))?;
        let chain_id = self.chain_id.ok_or(Error::MissingConfig(ENV_CHAIN_ID))?;

        let trimmed = private_key.trim();
        let key_hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| Error::InvalidConfig(format!("private key is not hex: {}", e)))?;
        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|_| Error::InvalidConfig("private key is not a valid secp256k1 scalar".into()))?;

        Ok(Identity {
            address: address_of(&signing_key),
            signing_key,
            chain_id,
        })
    }
}

/// A resolved wallet identity
#[derive(Clone)]
pub struct Identity {
    pub signing_key: SigningKey,
    pub address: Address,
    pub chain_id: u64,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Regenerates request parameters from scratch
pub type RequestParamsCallback = Arc<dyn Fn() -> RequestParams + Send + Sync>;

/// Options for one attestation task
#[derive(Clone)]
pub struct TaskOptions {
    pub ssl_cipher: String,
    pub algorithm_type: String,
    pub special_task: Option<String>,
    pub no_proxy: bool,

    /// Attestation recipient; defaults to the wallet address
    pub recipient: Option<Address>,

    /// Called before every attest attempt, since signed request parameters
    /// (timestamps, nonces) can expire between retries
    pub request_params_callback: Option<RequestParamsCallback>,

    pub submit_retry: RetryPolicy,
    pub attest_retry: RetryPolicy,
    pub poll_retry: RetryPolicy,

    pub attest_timeout: Duration,

    /// Deadline for init, submit, poll and response fetches; `None` waits forever
    pub call_timeout: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            ssl_cipher: DEFAULT_SSL_CIPHER.to_string(),
            algorithm_type: DEFAULT_ALGORITHM_TYPE.to_string(),
            special_task: None,
            no_proxy: true,
            recipient: None,
            request_params_callback: None,
            submit_retry: RetryPolicy::exponential(5, Duration::from_millis(1000)),
            attest_retry: RetryPolicy::exponential(3, Duration::from_millis(1000)),
            poll_retry: RetryPolicy::exponential(5, Duration::from_millis(1000)),
            attest_timeout: ATTEST_TIMEOUT,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl TaskOptions {
    pub fn with_request_params_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> RequestParams + Send + Sync + 'static,
    {
        self.request_params_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_recipient(mut self, recipient: Address) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_algorithm_type(mut self, algorithm_type: impl Into<String>) -> Self {
        self.algorithm_type = algorithm_type.into();
        self
    }

    pub fn with_ssl_cipher(mut self, ssl_cipher: impl Into<String>) -> Self {
        self.ssl_cipher = ssl_cipher.into();
        self
    }

    pub fn with_special_task(mut self, special_task: impl Into<String>) -> Self {
        self.special_task = Some(special_task.into());
        self
    }

    pub fn with_proxy(mut self, use_proxy: bool) -> Self {
        self.no_proxy = !use_proxy;
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("ssl_cipher", &self.ssl_cipher)
            .field("algorithm_type", &self.algorithm_type)
            .field("special_task", &self.special_task)
            .field("no_proxy", &self.no_proxy)
            .field("recipient", &self.recipient)
            .field("request_params_callback", &self.request_params_callback.is_some())
            .field("submit_retry", &self.submit_retry)
            .field("attest_retry", &self.attest_retry)
            .field("poll_retry", &self.poll_retry)
            .field("attest_timeout", &self.attest_timeout)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
