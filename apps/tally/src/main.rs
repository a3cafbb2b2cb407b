use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use rand::RngCore as _;
use serde::Serialize;
use tally_core::{Sensitive, SystemClock};
use tally_receipts::{Ledger, LedgerOptions, ReceiptIssuer, SqliteLedger};
use tally_secrets::{
    FileSecretProvider, FileSecretProviderOptions, SecretProviderKind, SecretProviderOptions,
    open_secret_provider,
};
use tally_signer::{Ed25519Signer, SEED_LEN, SIGN_SEED_SECRET};
use tracing::info;
use zeroize::Zeroizing;

mod config;

use config::Config;

/// Payloads larger than this are refused before signing.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Parser)]
#[command(name = "tally", version, about = "Signed, hash-chained receipt ledger")]
struct Args {
    /// Directory for the ledger and secrets file defaults.
    #[arg(long, env = "TALLY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// SQLite ledger path (default: <data_dir>/ledger.sqlite).
    #[arg(long, env = "TALLY_LEDGER_PATH")]
    ledger_path: Option<PathBuf>,

    /// Encrypted secrets file holding SIGN_SEED (default: <data_dir>/secrets.current.age).
    #[arg(long, env = "TALLY_SECRETS_FILE")]
    secrets_file: Option<PathBuf>,

    /// Passphrase for the secrets file.
    #[arg(long, env = "TALLY_SECRETS_PASSPHRASE", hide_env_values = true)]
    secrets_passphrase: Option<String>,

    /// Deployment label, only used for logging.
    #[arg(long, env = "TALLY_APP_ENV", default_value = "dev")]
    app_env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a fresh signing seed and seal it into the secrets file.
    InitSecrets {
        /// Replace an existing secrets file.
        #[arg(long)]
        force: bool,
    },
    /// Print the version label of the secrets file.
    SecretVersion,
    /// Print the signer's public key.
    PublicKey,
    /// Sign a payload and append it to the ledger.
    Issue {
        /// Payload text, or `@path` to read it from a file.
        #[arg(long)]
        payload: String,
    },
    /// Print the hash of the newest receipt.
    LastHash,
    /// Print receipts, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Recompute the whole chain; exits non-zero if it is broken.
    Verify,
}

#[derive(Debug, Serialize)]
struct PublicKeyOut {
    public_key_hex: String,
    did: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let cfg = Config::resolve(
        args.app_env.clone(),
        args.data_dir.as_deref(),
        args.ledger_path.as_deref(),
        args.secrets_file.as_deref(),
    )?;
    info!(
        app_env = %cfg.app_env,
        ledger = %cfg.ledger_path.display(),
        secrets = %cfg.secrets_file.display(),
        "starting"
    );
    let passphrase = args.secrets_passphrase.clone().map(Sensitive);

    match args.command {
        Command::InitSecrets { force } => {
            print_json(&init_secrets(&cfg, passphrase, force).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::SecretVersion => {
            let provider = secret_provider(&cfg, passphrase)?;
            println!("{}", provider.version().await?);
            Ok(ExitCode::SUCCESS)
        }
        Command::PublicKey => {
            let signer = load_signer(&cfg, passphrase).await?;
            print_json(&PublicKeyOut {
                public_key_hex: signer.public_key_hex(),
                did: signer.did_key(),
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Issue { payload } => {
            let payload = read_payload(&payload)?;
            let signer = Arc::new(load_signer(&cfg, passphrase).await?);
            let ledger = Arc::new(open_ledger(&cfg).await?);
            let issuer = ReceiptIssuer::new(signer, ledger);
            let receipt = issuer
                .issue_now(payload, &SystemClock)
                .await
                .context("issue receipt")?;
            info!(id = %receipt.id, hash = %receipt.hash, "issued receipt");
            print_json(&receipt)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::LastHash => {
            let ledger = open_ledger(&cfg).await?;
            match ledger.last_hash().await? {
                Some(h) => println!("{h}"),
                None => println!("(empty ledger)"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::List { limit, offset } => {
            let ledger = open_ledger(&cfg).await?;
            print_json(&ledger.list(limit, offset).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify => {
            let ledger = open_ledger(&cfg).await?;
            let status = ledger.audit_chain().await?;
            print_json(&status)?;
            if status.is_intact() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

async fn init_secrets(
    cfg: &Config,
    passphrase: Option<Sensitive<String>>,
    force: bool,
) -> anyhow::Result<PublicKeyOut> {
    let passphrase = passphrase.context("missing passphrase (set TALLY_SECRETS_PASSPHRASE)")?;
    if cfg.secrets_file.exists() && !force {
        anyhow::bail!(
            "secrets file {} already exists (use --force to replace it)",
            cfg.secrets_file.display()
        );
    }

    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    rand::rng().fill_bytes(&mut seed[..]);
    let mut secrets = BTreeMap::new();
    secrets.insert(
        SIGN_SEED_SECRET.to_string(),
        base64::engine::general_purpose::STANDARD.encode(&seed[..]),
    );
    let sealed = FileSecretProvider::seal(&cfg.secrets_file, &passphrase, &secrets).await;
    if let Some(v) = secrets.get_mut(SIGN_SEED_SECRET) {
        zeroize::Zeroize::zeroize(v);
    }
    sealed.context("seal secrets file")?;

    let signer = Ed25519Signer::from_seed(&seed);
    info!(path = %cfg.secrets_file.display(), "sealed new signing seed");
    Ok(PublicKeyOut {
        public_key_hex: signer.public_key_hex(),
        did: signer.did_key(),
    })
}

fn secret_provider(
    cfg: &Config,
    passphrase: Option<Sensitive<String>>,
) -> anyhow::Result<FileSecretProvider> {
    let passphrase = passphrase.context("missing passphrase (set TALLY_SECRETS_PASSPHRASE)")?;
    Ok(FileSecretProvider::new(FileSecretProviderOptions {
        path: cfg.secrets_file.clone(),
        passphrase,
    }))
}

async fn load_signer(
    cfg: &Config,
    passphrase: Option<Sensitive<String>>,
) -> anyhow::Result<Ed25519Signer> {
    let provider = open_secret_provider(SecretProviderOptions {
        kind: SecretProviderKind::File,
        secrets_file: cfg.secrets_file.clone(),
        passphrase,
    })
    .await
    .context("open secrets file")?;
    Ed25519Signer::from_provider(provider.as_ref())
        .await
        .context("derive signer from SIGN_SEED")
}

async fn open_ledger(cfg: &Config) -> anyhow::Result<SqliteLedger> {
    SqliteLedger::open(LedgerOptions::new(cfg.ledger_path.clone()))
        .await
        .with_context(|| format!("open ledger {}", cfg.ledger_path.display()))
}

fn read_payload(arg: &str) -> anyhow::Result<Vec<u8>> {
    let bytes = match arg.strip_prefix('@') {
        Some(path) => std::fs::read(path).with_context(|| format!("read payload file {path}"))?,
        None => arg.as_bytes().to_vec(),
    };
    if bytes.len() > MAX_PAYLOAD_BYTES {
        anyhow::bail!("payload too large");
    }
    Ok(bytes)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("encode output")?;
    let mut stdout = std::io::stdout();
    stdout.write_all(out.as_bytes()).context("write stdout")?;
    stdout.write_all(b"\n").context("write stdout")?;
    Ok(())
}
