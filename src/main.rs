use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pdf_seal::audit::AUDIT_TARGET;
use pdf_seal::openssl::{generate_protected_key, OpenSslVerifier};
use pdf_seal::trust_store::register;
use pdf_seal::{server, verify_signed_pdf, Config, JsonFileTrustStore};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter, fmt, EnvFilter, Layer};

/// Stamps registered signature images onto PDFs and seals them.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "PDF_SEAL_CONFIG")]
    config: Option<PathBuf>,

    /// Trust store JSON file.
    #[arg(long, global = true)]
    trust_store: Option<PathBuf>,

    /// Directory of registered signature images.
    #[arg(long, global = true)]
    images_dir: Option<PathBuf>,

    /// Write audit events as JSON lines to this file.
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the HTTP signing service.
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Registers (or replaces) the signature image of a user.
    Register {
        user_id: String,
        /// Image file name, relative to the images directory.
        image_filename: String,
    },
    /// Checks the seal of a signed PDF against the signer's public key.
    Verify {
        signed_pdf: PathBuf,
        #[arg(long)]
        public_key: PathBuf,
    },
    /// Generates an RSA key pair with a passphrase protected private key.
    Keygen {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        public_out: PathBuf,
        #[arg(long, env = "PDF_SEAL_PASSPHRASE")]
        passphrase: String,
        #[arg(long, default_value_t = 2048)]
        bits: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("could not load configuration")?;
    if let Some(trust_store) = cli.trust_store {
        config.trust_store = trust_store;
    }
    if let Some(images_dir) = cli.images_dir {
        config.images_dir = images_dir;
    }
    if let Some(audit_log) = cli.audit_log {
        config.audit_log = Some(audit_log);
    }

    let _guard = init_tracing(cli.verbose, config.audit_log.as_deref())?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            serve(config).await
        }
        Command::Register {
            user_id,
            image_filename,
        } => register_user(&config, &user_id, &image_filename),
        Command::Verify {
            signed_pdf,
            public_key,
        } => verify(&signed_pdf, &public_key),
        Command::Keygen {
            out,
            public_out,
            passphrase,
            bits,
        } => keygen(&out, &public_out, &passphrase, bits),
    }
}

/// Human readable logs go to stderr. Audit events are also written to
/// `audit_log`, one JSON object per line, when it is set.
fn init_tracing(verbose: bool, audit_log: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let (audit, guard) = match audit_log {
        Some(path) => {
            let file_name = path
                .file_name()
                .context("audit log path has no file name")?;
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create {}", dir.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter::filter_fn(|metadata| {
                    metadata.target() == AUDIT_TARGET
                }));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(audit)
        .try_init()?;

    Ok(guard)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.images_dir).with_context(|| {
        format!(
            "could not create images directory {}",
            config.images_dir.display()
        )
    })?;

    let signer = Arc::new(server::signer_from_config(&config));
    let app = server::router(signer, &config);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("could not bind to {}", config.bind))?;
    tracing::info!(
        bind = %config.bind,
        trust_store = %config.trust_store.display(),
        images_dir = %config.images_dir.display(),
        "secure signing service listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

fn register_user(config: &Config, user_id: &str, image_filename: &str) -> anyhow::Result<()> {
    let store = JsonFileTrustStore::new(&config.trust_store);
    let registration = register(&store, &config.images_dir, user_id, image_filename)
        .with_context(|| format!("could not register {user_id:?}"))?;

    println!(
        "registered {} -> {} (SHA-256 {})",
        registration.user_id, registration.record.image_filename, registration.record.image_hash
    );
    if let Some(previous) = registration.previous {
        println!(
            "replaced registration of {} ({}, SHA-256 {})",
            previous.registered_at, previous.image_filename, previous.image_hash
        );
    }
    Ok(())
}

fn verify(signed_pdf: &Path, public_key: &Path) -> anyhow::Result<()> {
    let pdf = std::fs::read(signed_pdf)
        .with_context(|| format!("could not read {}", signed_pdf.display()))?;
    let pem = std::fs::read(public_key)
        .with_context(|| format!("could not read {}", public_key.display()))?;
    let verifier = OpenSslVerifier::from_public_pem(&pem).context("invalid public key")?;

    let seal = verify_signed_pdf(&pdf, &verifier).context("seal verification failed")?;
    println!("valid seal");
    println!("  signer:       {}", seal.claims.signer_identity);
    println!("  signed at:    {}", seal.claims.signed_at);
    println!("  image SHA256: {}", seal.claims.image_hash);
    println!("  signed bytes: {} of {}", seal.signed_length, pdf.len());
    Ok(())
}

fn keygen(out: &Path, public_out: &Path, passphrase: &str, bits: u32) -> anyhow::Result<()> {
    if passphrase.is_empty() {
        bail!("the private key passphrase must not be empty");
    }
    let keys = generate_protected_key(passphrase, bits).context("key generation failed")?;

    write_private(out, &keys.private_pem)
        .with_context(|| format!("could not write {}", out.display()))?;
    std::fs::write(public_out, &keys.public_pem)
        .with_context(|| format!("could not write {}", public_out.display()))?;

    println!(
        "wrote {} (encrypted) and {}",
        out.display(),
        public_out.display()
    );
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, pem: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?
        .write_all(pem)
}

#[cfg(not(unix))]
fn write_private(path: &Path, pem: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, pem)
}
