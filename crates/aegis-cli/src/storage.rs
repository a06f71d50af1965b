use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use aegis_storage::{key_provider::KeyringProvider, FileBackend, KeyProvider};
use aegis_vault::{Vault, VaultOptions};
use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;

/// Resolve the default data directory for Aegis.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("aegis"))
}

fn device_keys() -> KeyringProvider {
    KeyringProvider::new("aegis", "audit-key")
}

/// Open the vault in the configured data directory, audit key in the OS keychain.
pub async fn vault_from_config(config: &Config) -> Result<Vault> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "opening vault");
    open_vault(root, &device_keys(), config.vault_options()?).await
}

async fn open_vault(
    root: PathBuf,
    device_keys: &dyn KeyProvider,
    options: VaultOptions,
) -> Result<Vault> {
    let backend = Arc::new(FileBackend::open(root)?);
    Ok(Vault::open(backend, device_keys, options).await?)
}

/// Helper for tests: a file-backed vault under `root` with an in-memory audit key.
#[cfg(test)]
pub async fn test_vault(root: impl Into<PathBuf>) -> Vault {
    open_vault(
        root.into(),
        &aegis_storage::key_provider::InMemoryKeyProvider::default(),
        VaultOptions::default(),
    )
    .await
    .expect("test vault")
}
