//! TradeYoda license agent
//!
//! Runs next to the dashboard and owns the license state of this
//! installation:
//! 1. Activates and deactivates license keys
//! 2. Serves the capability surface over a local HTTP API
//! 3. Revalidates periodically against the licensing server
//!
//! Usage:
//!   tradeyoda-license-agent activate TYODA-XXXX-XXXX-XXXX-XXXX
//!   tradeyoda-license-agent serve --port 8765

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tradeyoda_license::{LicenseConfig, LicenseValidator, spawn_revalidation};
use tradeyoda_license_agent::{LicenseStatus, build_router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tradeyoda-license-agent")]
#[command(about = "TradeYoda license agent")]
struct Args {
    /// Path to a JSON licensing config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate once and print the license status
    Status,
    /// Store a license key and validate it
    Activate {
        /// License key (TYODA-XXXX-XXXX-XXXX-XXXX)
        key: String,
    },
    /// Remove the license key and cached entitlement
    Deactivate,
    /// Serve the license API and revalidate periodically
    Serve {
        /// HTTP API port
        #[arg(short, long, default_value = "8765")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(args.config.as_deref())?;
    let validator = Arc::new(
        LicenseValidator::from_config(&config).context("Failed to open license state")?,
    );
    info!("License data in {:?}", config.data_dir);

    match args.command {
        Command::Status => {
            let outcome = validator.validate().await;
            print_status(&LicenseStatus::from_outcome(&outcome))?;
        }
        Command::Activate { key } => {
            let state = validator
                .activate(&key)
                .await
                .context("Failed to activate license")?;
            info!("Activation finished: {}", state);
            print_status(&LicenseStatus::from_outcome(&validator.last_outcome()))?;
        }
        Command::Deactivate => {
            validator
                .deactivate()
                .await
                .context("Failed to deactivate license")?;
            println!("License removed from this device");
        }
        Command::Serve { port, bind } => {
            serve(validator, &config, &bind, port).await?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<LicenseConfig> {
    let mut config = match path {
        Some(path) => LicenseConfig::load(path)?,
        None => LicenseConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn print_status(status: &LicenseStatus) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(status)?);
    Ok(())
}

async fn serve(
    validator: Arc<LicenseValidator>,
    config: &LicenseConfig,
    bind: &str,
    port: u16,
) -> Result<()> {
    let initial = validator.validate().await;
    info!("Initial license state: {} ({})", initial.state, initial.notice());

    let _revalidation = spawn_revalidation(validator.clone(), config.revalidation_interval());

    let app = build_router(validator);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    info!("License API listening on {}:{}", bind, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}
