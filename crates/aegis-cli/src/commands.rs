use std::{fs, path::Path};

use aegis_core::{
    records::{PropertyRecord, SimulationRecord, UserSettings},
    Collection, Entry, SecurityEvent,
};
use aegis_storage::KeyHandle;
use aegis_vault::{IntegrityReport, RotationSummary, Vault};
use color_eyre::{
    eyre::{bail, eyre},
    Result,
};
use serde_json::Value;
use tracing::info;

use crate::{cli::Command, config::Config, storage};

pub const PASSWORD_ENV: &str = "AEGIS_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "AEGIS_NEW_PASSWORD";

/// Execute a vault subcommand against the configured data directory.
pub async fn handle(command: Command, user: Option<String>, config: &Config) -> Result<()> {
    let vault = storage::vault_from_config(config).await?;
    let identity = || {
        user.clone()
            .or_else(|| config.user.clone())
            .ok_or_else(|| eyre!("no user given: pass --user or set `user` in the config"))
    };

    match command {
        Command::Put { collection, json } => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            println!("{}", put(&vault, &key, collection, &json).await?);
        }
        Command::Get { collection, id } => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            let entry: Entry<Value> = vault.retrieve_data(collection, &id, &key).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::List { collection } => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            let entries: Vec<Entry<Value>> = vault.retrieve_all_data(collection, &key).await?;
            if entries.is_empty() {
                println!("No records in {collection}.");
            }
            for entry in entries {
                println!("{}  {}", entry.id, entry.record);
            }
        }
        Command::Update {
            collection,
            id,
            json,
        } => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            update(&vault, &key, collection, &id, &json).await?;
            println!("Updated {collection}/{id}");
        }
        Command::Delete { collection, id } => {
            // No key needed; sign-in keeps deletes behind the lockout gate.
            vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            vault.delete_data(collection, &id).await?;
            println!("Deleted {collection}/{id}");
        }
        Command::Export { collection, file } => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            export_to(&vault, &key, collection, &file).await?;
            println!("Exported {collection} to {}", file.display());
        }
        Command::Import { collection, file } => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            let count = import_from(&vault, &key, collection, &file).await?;
            println!("Imported {count} record(s) into {collection}");
        }
        Command::Rotate => {
            let summary = rotate(
                &vault,
                &identity()?,
                &secret(PASSWORD_ENV)?,
                &secret(NEW_PASSWORD_ENV)?,
            )
            .await?;
            println!(
                "Rotated {} record(s){}",
                summary.records,
                if summary.resumed { " (resumed)" } else { "" }
            );
        }
        Command::Verify => {
            let key = vault.sign_in(&identity()?, &secret(PASSWORD_ENV)?).await?;
            let report = vault.verify_integrity(&key).await?;
            print!("{}", render_report(&report));
            if !report.is_clean() {
                bail!("integrity check failed");
            }
        }
        Command::Status => {
            let status = vault.check_security_status()?;
            match status.unlock_at {
                Some(at) => println!("Sign-in: locked until {}", at.to_rfc3339()),
                None => println!("Sign-in: unlocked"),
            }
            println!("Schema: v{}", vault.schema_version().await?);
            if let Some(journal) = vault.pending_rotation().await? {
                println!(
                    "Rotation: interrupted (started {}, done: {:?}); rerun `aegis rotate`",
                    journal.started_at.to_rfc3339(),
                    journal.completed
                );
            }
            if let Ok(password) = secret(PASSWORD_ENV) {
                let key = vault.sign_in(&identity()?, &password).await?;
                if vault.rotation_recommended(&key).await? {
                    println!("Key: older than the rotation threshold; consider `aegis rotate`");
                } else {
                    println!("Key: ok");
                }
            }
        }
        Command::Audit => {
            let events = vault.security_events().await?;
            if events.is_empty() {
                println!("No security events recorded.");
            }
            for event in &events {
                println!("{}", render_event(event));
            }
        }
        other @ (Command::Version | Command::Health | Command::Config(_)) => {
            bail!("{other:?} does not operate on the vault")
        }
    }
    Ok(())
}

fn secret(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| eyre!("{var} is not set"))
}

/// Check a JSON document against the collection's record type and normalize it.
pub fn parse_record(collection: Collection, raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)?;
    let normalized = match collection {
        Collection::Properties => {
            serde_json::to_value(serde_json::from_value::<PropertyRecord>(value)?)?
        }
        Collection::Simulations => {
            serde_json::to_value(serde_json::from_value::<SimulationRecord>(value)?)?
        }
        Collection::Settings => {
            serde_json::to_value(serde_json::from_value::<UserSettings>(value)?)?
        }
        Collection::SecurityAudit => bail!("{collection} is append-only"),
    };
    Ok(normalized)
}

pub async fn put(
    vault: &Vault,
    key: &KeyHandle,
    collection: Collection,
    raw: &str,
) -> Result<String> {
    if collection == Collection::Settings {
        bail!(
            "settings are created on first sign-in; \
             use `aegis update settings user-settings <json>`"
        );
    }
    let record = parse_record(collection, raw)?;
    Ok(vault.store_data(collection, &record, key).await?)
}

pub async fn update(
    vault: &Vault,
    key: &KeyHandle,
    collection: Collection,
    id: &str,
    raw: &str,
) -> Result<()> {
    let record = parse_record(collection, raw)?;
    Ok(vault.update_data(collection, id, &record, key).await?)
}

pub async fn export_to(
    vault: &Vault,
    key: &KeyHandle,
    collection: Collection,
    file: &Path,
) -> Result<()> {
    let contents = vault.export_collection(collection, key).await?;
    fs::write(file, contents)?;
    Ok(())
}

pub async fn import_from(
    vault: &Vault,
    key: &KeyHandle,
    collection: Collection,
    file: &Path,
) -> Result<usize> {
    let contents = fs::read_to_string(file)?;
    Ok(vault.import_collection(collection, &contents, key).await?)
}

/// Rotate from `password` to `new_password`. An interrupted rotation is
/// resumed; the journal's key ids then stand in for the settings check.
pub async fn rotate(
    vault: &Vault,
    identity: &str,
    password: &str,
    new_password: &str,
) -> Result<RotationSummary> {
    if password == new_password {
        bail!("{NEW_PASSWORD_ENV} must differ from {PASSWORD_ENV}");
    }

    let old = if vault.pending_rotation().await?.is_some() {
        info!("resuming interrupted rotation");
        vault.derive_key(identity, password).await?
    } else {
        vault.sign_in(identity, password).await?
    };
    let new = vault.derive_key(identity, new_password).await?;
    Ok(vault.rotate_key(&old, &new).await?)
}

fn render_report(report: &IntegrityReport) -> String {
    let mut out = format!("Checked {} record(s)\n", report.checked);
    for bad in &report.violations {
        out.push_str(&format!("  tampered: {}/{}\n", bad.collection, bad.id));
    }
    for bad in &report.decryption_failures {
        out.push_str(&format!("  undecryptable: {}/{}\n", bad.collection, bad.id));
    }
    if report.is_clean() {
        out.push_str("All records verified\n");
    }
    out
}

fn render_event(event: &SecurityEvent) -> String {
    let label = serde_json::to_value(event.event_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    format!(
        "{}  {:<24} {}",
        event.timestamp.to_rfc3339(),
        label,
        event.details
    )
}
