//! Certkeeper - inspect certificate storage
//!
//! Issuance needs an ACME protocol client supplied by the embedding
//! application; this binary reads the state that issuance leaves behind.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use certkeeper::{CertStore, CertkeeperConfig, ChallengeLedger, LocalDirectory};

/// Certkeeper - ACME certificate storage tool
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG")]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "log-json")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the certificate that would be served now
    Status,
    /// List recorded challenges
    Challenges,
    /// Validate the configuration file and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let config = CertkeeperConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration file {}", cli.config))?;

    match cli.command {
        Commands::Check => check(&cli.config, &config),
        Commands::Status => status(&config).await,
        Commands::Challenges => challenges(&config).await,
    }
}

fn check(path: &str, config: &CertkeeperConfig) -> Result<()> {
    info!("Configuration test successful:");
    info!("  - {} domain(s)", config.acme.domains.len());
    info!("  - {} contact(s)", config.acme.contact_emails.len());
    info!("  - storage at {}", config.storage.directory.display());

    println!("certkeeper: configuration file {} test is successful", path);
    Ok(())
}

fn open_storage(config: &CertkeeperConfig) -> Result<Arc<LocalDirectory>> {
    let directory = &config.storage.directory;
    let blob = LocalDirectory::new(directory)
        .with_context(|| format!("Failed to open storage directory {}", directory.display()))?;
    Ok(Arc::new(blob))
}

async fn status(config: &CertkeeperConfig) -> Result<()> {
    let certs = CertStore::new(open_storage(config)?);
    let now = Utc::now().timestamp_millis();

    let active = match certs.get_active(now, now).await? {
        Some(active) => Some(active),
        None => certs.get_active(0, now).await?,
    };

    match active {
        Some(active) => {
            let expired = active.not_after <= now;
            println!("order:      {}", active.order_url);
            println!("not before: {}", format_millis(active.not_before));
            println!("not after:  {}", format_millis(active.not_after));
            if expired {
                println!("status:     expired");
            } else {
                let days = (active.not_after - now) / (24 * 3600 * 1000);
                println!("status:     valid ({} day(s) left)", days);
            }
        }
        None => println!("no certificate stored"),
    }
    Ok(())
}

async fn challenges(config: &CertkeeperConfig) -> Result<()> {
    let ledger = ChallengeLedger::new(open_storage(config)?);
    let challenges = ledger.list().await?;

    if challenges.is_empty() {
        println!("no challenges recorded");
        return Ok(());
    }

    for challenge in challenges {
        println!(
            "{}  {}  {:?}  {}  expires {}",
            challenge.id,
            challenge.challenge_type,
            challenge.validation_status,
            challenge.http_resource.path,
            format_millis(challenge.expires)
        );
    }
    Ok(())
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
