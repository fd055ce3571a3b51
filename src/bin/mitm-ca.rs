use anyhow::{Context, Result};
use clap::Parser;
use mitm_ca::{CaBootstrapper, CaConfig, SerialAllocator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Bootstrap the root CA used for TLS interception.
///
/// Loads the CA certificate and private key from the user configuration
/// directory, or generates and stores a new pair if they are missing or
/// unusable.
#[derive(Parser, Debug)]
#[command(name = "mitm-ca")]
#[command(version, about)]
struct Args {
    /// Path to the configuration file (YAML).
    /// If not specified, built-in defaults are used.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Directory holding the CA files. Overrides the configuration.
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,

    /// Also write the CA certificate as PEM to this file, for installing
    /// into a trust store.
    #[arg(long, value_name = "FILE")]
    export_pem: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(config_path) => CaConfig::load(&config_path)
            .with_context(|| format!("failed to load config from {:?}", config_path))?,
        None => CaConfig::default(),
    };
    if let Some(dir) = args.dir {
        config.storage.directory = Some(dir);
    }

    let serials = Arc::new(SerialAllocator::from_clock());
    let bootstrapper = CaBootstrapper::from_config(&config, serials);
    let ca = bootstrapper
        .bootstrap()
        .context("failed to bootstrap CA")?;
    let cert = ca.certificate();

    println!("certificate: {}", bootstrapper.cert_path().display());
    println!("private key: {}", bootstrapper.key_path().display());
    println!("origin:      {:?}", ca.origin());
    println!("subject:     {}", cert.subject());
    println!("serial:      {}", hex::encode(cert.serial()));
    println!("not before:  {}", cert.not_before());
    println!("not after:   {}", cert.not_after());
    println!("sha256:      {}", ca.fingerprint());

    if let Some(path) = args.export_pem {
        write_pem(&path, &ca.cert_pem())?;
        info!("exported CA certificate to {}", path.display());
    }

    Ok(())
}

fn write_pem(path: &Path, pem: &str) -> Result<()> {
    std::fs::write(path, pem.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
