mod cli;
mod commands;
mod config;
mod storage;

use crate::cli::ConfigCommand;
use aegis_core::Collection;
use aegis_storage::envelope;
use aegis_vault::Vault;
use clap::Parser;
use color_eyre::Result;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => commands::handle(command, cli.user, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("aegis {}", env!("CARGO_PKG_VERSION"));
}

/// Opens the vault and exercises the audit key and the sealing path.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let vault = storage::vault_from_config(config).await?;
    let events = run_vault_health(&vault).await?;
    println!("Storage: ok (schema v{})", vault.schema_version().await?);
    println!("Audit log: ok ({events} events)");
    println!("Crypto: ok");
    Ok(())
}

async fn run_vault_health(vault: &Vault) -> Result<usize> {
    let events = vault.security_events().await?.len();

    let key = Vault::generate_ephemeral_key()?;
    let probe = json!({ "probe": "ok" });
    let sealed = envelope::seal("health/probe", &probe, &key)?;
    let opened = envelope::open(Collection::Properties, &sealed, &key)?;
    if opened.record != probe {
        color_eyre::eyre::bail!("seal/open round-trip failed");
    }
    Ok(events)
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
