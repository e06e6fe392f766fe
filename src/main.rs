use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use zktls_attest::api::RequestParams;
use zktls_attest::attestation::{AttestationArtifact, Verification};
use zktls_attest::{compute_commitment, Address, Credentials, Error, HttpNetworkClient, Orchestrator, TaskOptions};

#[derive(Parser)]
#[command(name = "zktls")]
#[command(version)]
#[command(about = "Obtain and verify zkTLS attestations of HTTP responses")]
struct Cli {
    /// Debug-level logging (logs go to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the signature of an attestation artifact
    Verify {
        /// Path to the artifact JSON (task output, wrapped or raw attestation)
        path: PathBuf,

        /// Fail unless the recovered signer is this address
        #[arg(long)]
        expected_signer: Option<String>,

        /// Print the verification report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the Poseidon2 commitment for an off-chain payment
    Commitment {
        #[arg(long)]
        amount: String,

        #[arg(long)]
        currency: String,

        #[arg(long)]
        counterparty: String,

        #[arg(long)]
        tx_id: String,
    },

    /// Run an attestation task against the network
    Attest {
        /// JSON file with `requests` and `responseResolves`; re-read before every attest attempt
        #[arg(long)]
        params: PathBuf,

        /// Attestation network base URL
        #[arg(long, env = "ZKTLS_ENDPOINT")]
        endpoint: String,

        /// Write the task output here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Attestation recipient (defaults to the wallet address)
        #[arg(long)]
        recipient: Option<String>,

        #[arg(long, default_value = zktls_attest::config::DEFAULT_ALGORITHM_TYPE)]
        algorithm_type: String,

        #[arg(long, default_value = zktls_attest::config::DEFAULT_SSL_CIPHER)]
        ssl_cipher: String,

        /// Let the attestor reach the target through its proxy
        #[arg(long)]
        use_proxy: bool,

        /// Special task mode understood by the attestor
        #[arg(long)]
        special_task: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.cmd {
        Command::Verify {
            path,
            expected_signer,
            json,
        } => verify(&path, expected_signer.as_deref(), json),

        Command::Commitment {
            amount,
            currency,
            counterparty,
            tx_id,
        } => {
            let commitment = compute_commitment(&amount, &currency, &counterparty, &tx_id)
                .map_err(|e| CliError::Input(e.to_string()))?;
            println!("{}", commitment);
            Ok(())
        }

        Command::Attest {
            params,
            endpoint,
            out,
            recipient,
            algorithm_type,
            ssl_cipher,
            use_proxy,
            special_task,
        } => {
            attest(AttestArgs {
                params,
                endpoint,
                out,
                recipient,
                algorithm_type,
                ssl_cipher,
                use_proxy,
                special_task,
            })
            .await
        }
    }
}

#[derive(Serialize)]
struct VerifyOut<'a> {
    ok: bool,
    #[serde(flatten)]
    verification: &'a Verification,
}

fn verify(path: &Path, expected_signer: Option<&str>, json: bool) -> Result<(), CliError> {
    let expected = expected_signer
        .map(|s| s.parse::<Address>())
        .transpose()
        .map_err(|e| CliError::Input(e.to_string()))?;

    let bytes = read_file(path)?;
    let artifact = AttestationArtifact::from_slice(&bytes).map_err(|e| CliError::Input(e.to_string()))?;
    let verification = artifact
        .verify(expected.as_ref())
        .map_err(|e| CliError::Input(e.to_string()))?;

    let ok = verification.is_trusted();
    if json {
        let payload = VerifyOut {
            ok,
            verification: &verification,
        };
        let s = serde_json::to_string(&payload).map_err(|e| CliError::Json(format!("{e}")))?;
        println!("{s}");
    } else {
        println!("signer:           {}", verification.signer);
        println!("message hash:     {}", verification.message_hash);
        println!("signature valid:  {}", verification.signature_valid);
        match verification.signer_matches {
            Some(matches) => println!("signer matches:   {}", matches),
            None => println!("signer matches:   n/a"),
        }
        match verification.hash_matches {
            Some(matches) => println!("hash match:       {}", matches),
            None => println!("hash match:       n/a"),
        }
    }

    if !verification.signature_valid {
        return Err(CliError::VerifyFailed("signature does not verify".into()));
    }
    if verification.signer_matches == Some(false) {
        return Err(CliError::VerifyFailed(format!(
            "signer {} is not the expected signer",
            verification.signer
        )));
    }
    if verification.hash_matches == Some(false) {
        return Err(CliError::VerifyFailed(
            "private response does not match the attested hash".into(),
        ));
    }
    Ok(())
}

struct AttestArgs {
    params: PathBuf,
    endpoint: String,
    out: Option<PathBuf>,
    recipient: Option<String>,
    algorithm_type: String,
    ssl_cipher: String,
    use_proxy: bool,
    special_task: Option<String>,
}

async fn attest(args: AttestArgs) -> Result<(), CliError> {
    // A missing .env is fine; the variables may already be set
    let _ = dotenv::dotenv();
    let credentials = Credentials::from_env().map_err(CliError::from)?;

    let initial = read_params(&args.params)?;

    let mut options = TaskOptions::default()
        .with_algorithm_type(args.algorithm_type)
        .with_ssl_cipher(args.ssl_cipher)
        .with_proxy(args.use_proxy);
    if let Some(recipient) = &args.recipient {
        let address = recipient
            .parse::<Address>()
            .map_err(|e| CliError::Input(e.to_string()))?;
        options = options.with_recipient(address);
    }
    if let Some(special_task) = args.special_task {
        options = options.with_special_task(special_task);
    }

    let params_path = args.params.clone();
    let last_read = Arc::new(Mutex::new(initial.clone()));
    options = options.with_request_params_callback(move || reread_params(&params_path, &last_read));

    let orchestrator = Orchestrator::new(HttpNetworkClient::new(args.endpoint), credentials, options);
    let data = orchestrator
        .run_attestation_task(initial.requests, initial.response_resolves)
        .await
        .map_err(CliError::from)?;

    let output = data.to_json_pretty().map_err(|e| CliError::Json(format!("{e}")))?;
    match &args.out {
        Some(path) => {
            write_file_atomic(path, output.as_bytes())?;
            info!(path = %path.display(), task_id = %data.requestid, "wrote attestation");
        }
        None => println!("{output}"),
    }
    Ok(())
}

fn read_params(path: &Path) -> Result<RequestParams, CliError> {
    let bytes = read_file(path)?;
    let params: RequestParams =
        serde_json::from_slice(&bytes).map_err(|e| CliError::Json(format!("{}: {e}", path.display())))?;
    params.validate().map_err(|e| CliError::Input(e.to_string()))?;
    Ok(params)
}

/// Re-read the params file, keeping the last version that parsed
fn reread_params(path: &Path, last_read: &Mutex<RequestParams>) -> RequestParams {
    let mut last = match last_read.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match read_params(path) {
        Ok(params) => {
            *last = params.clone();
            params
        }
        Err(e) => {
            warn!(error = %e, "could not re-read request parameters, reusing the last good read");
            last.clone()
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|e| CliError::Io(format!("{}: {e}", path.display())))
}

fn write_file_atomic(path: &Path, data: &[u8]) -> Result<(), CliError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| CliError::Io(format!("invalid output path: {}", path.display())))?
        .to_string_lossy()
        .to_string();
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    fs::write(&tmp_path, data).map_err(|e| CliError::Io(format!("{}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| CliError::Io(format!("{}: {e}", path.display())))?;
    Ok(())
}

#[derive(Debug)]
enum CliError {
    Io(String),
    Json(String),
    Input(String),
    Config(String),
    Task(String),
    VerifyFailed(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::VerifyFailed(_) => 1,
            CliError::Io(_) | CliError::Json(_) | CliError::Input(_) => 2,
            CliError::Config(_) => 3,
            CliError::Task(_) => 4,
        }
    }
}

impl From<Error> for CliError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidInput(_) => CliError::Input(e.to_string()),
            Error::MissingConfig(_) | Error::InvalidConfig(_) => CliError::Config(e.to_string()),
            other => CliError::Task(other.to_string()),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Io(s) => write!(f, "io: {s}"),
            CliError::Json(s) => write!(f, "json: {s}"),
            CliError::Input(s) => write!(f, "{s}"),
            CliError::Config(s) => write!(f, "config: {s}"),
            CliError::Task(s) => write!(f, "{s}"),
            CliError::VerifyFailed(s) => write!(f, "verify failed: {s}"),
        }
    }
}
