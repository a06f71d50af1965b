//! Encrypted local storage for Aegis.
//!
//! [`Vault`] is the programmatic surface: key derivation, sealed record CRUD
//! over the four collections, encrypted export/import, key rotation,
//! integrity sweeps, and brute-force lockout with an append-only audit log.

pub mod audit;
pub mod backup;
pub mod monitor;
pub mod rotation;
pub mod schema;
pub mod settings;
pub mod store;

use std::sync::Arc;

use aegis_core::{
    records::UserSettings,
    storage::{InMemoryBackend, RecordBackend},
    AuthStatus, Collection, Entry, Result, SecurityEvent, VaultError,
};
use aegis_storage::{kdf, key_provider::InMemoryKeyProvider, KdfParams, KeyHandle, KeyProvider};
use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, instrument};

pub use audit::{AuditLog, AuditRetention};
pub use monitor::{AuthAttemptState, LockoutPolicy, SecurityMonitor};
pub use rotation::{RotationJournal, RotationSummary};
pub use store::{IntegrityReport, RecordRef, RecordStore};

#[derive(Debug, Clone, Copy)]
pub struct VaultOptions {
    pub kdf: KdfParams,
    pub lockout: LockoutPolicy,
    pub audit: AuditRetention,
    /// Keys older than this are reported as due for rotation.
    pub rotation_threshold: Duration,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            lockout: LockoutPolicy::default(),
            audit: AuditRetention::default(),
            rotation_threshold: Duration::days(settings::DEFAULT_ROTATION_THRESHOLD_DAYS),
        }
    }
}

pub struct Vault {
    store: RecordStore,
    monitor: SecurityMonitor,
    options: VaultOptions,
}

impl Vault {
    /// Upgrade the backend's schema and wire the store, audit log and monitor.
    /// `device_keys` supplies the key the audit log is sealed with.
    pub async fn open(
        backend: Arc<dyn RecordBackend>,
        device_keys: &dyn KeyProvider,
        options: VaultOptions,
    ) -> Result<Self> {
        let version = schema::upgrade(backend.as_ref()).await?;
        let audit = Arc::new(AuditLog::new(
            backend.clone(),
            device_keys.get_or_create().await?,
            options.audit,
        ));
        let monitor = SecurityMonitor::new(options.lockout, audit.clone());
        info!(schema = version, "vault opened");
        Ok(Self {
            store: RecordStore::new(backend, audit),
            monitor,
            options,
        })
    }

    /// Volatile vault for demos and tests; nothing outlives the process.
    pub async fn in_memory() -> Result<Self> {
        Self::open(
            Arc::new(InMemoryBackend::new()),
            &InMemoryKeyProvider::default(),
            VaultOptions::default(),
        )
        .await
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub async fn derive_key(&self, identifier: &str, password: &str) -> Result<KeyHandle> {
        kdf::derive_key(self.store.backend(), identifier, password, self.options.kdf).await
    }

    pub fn generate_ephemeral_key() -> Result<KeyHandle> {
        aegis_storage::generate_ephemeral_key()
    }

    /// Full login: lockout gate, derivation, and a trial decrypt of the
    /// settings record (written with defaults on first use). A wrong password
    /// counts as a failed attempt.
    #[instrument(skip_all)]
    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<KeyHandle> {
        self.monitor.ensure_unlocked()?;
        let key = self.derive_key(identifier, password).await?;

        match self
            .store
            .get::<UserSettings>(Collection::Settings, aegis_core::records::SETTINGS_ID, &key)
            .await
        {
            Ok(_) => {}
            Err(VaultError::NotFound { .. }) => {
                settings::save(&self.store, &key, &UserSettings::default()).await?;
                info!("first sign-in; settings initialized");
            }
            Err(err @ VaultError::Decryption { .. }) => {
                self.monitor.track_attempt(false).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        }
        self.monitor.track_attempt(true).await?;
        Ok(key)
    }

    pub async fn store_data<T: Serialize + Sync>(
        &self,
        collection: Collection,
        record: &T,
        key: &KeyHandle,
    ) -> Result<String> {
        self.store.create(collection, record, key).await
    }

    pub async fn retrieve_data<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        id: &str,
        key: &KeyHandle,
    ) -> Result<Entry<T>> {
        self.store.get(collection, id, key).await
    }

    pub async fn retrieve_all_data<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        key: &KeyHandle,
    ) -> Result<Vec<Entry<T>>> {
        self.store.get_all(collection, key).await
    }

    pub async fn update_data<T: Serialize + Sync>(
        &self,
        collection: Collection,
        id: &str,
        record: &T,
        key: &KeyHandle,
    ) -> Result<()> {
        self.store.update(collection, id, record, key).await
    }

    pub async fn delete_data(&self, collection: Collection, id: &str) -> Result<()> {
        self.store.delete(collection, id).await
    }

    pub async fn export_collection(
        &self,
        collection: Collection,
        key: &KeyHandle,
    ) -> Result<String> {
        backup::export_collection(&self.store, collection, key).await
    }

    pub async fn import_collection(
        &self,
        collection: Collection,
        contents: &str,
        key: &KeyHandle,
    ) -> Result<usize> {
        backup::import_collection(&self.store, collection, contents, key).await
    }

    pub async fn rotate_key(&self, old: &KeyHandle, new: &KeyHandle) -> Result<RotationSummary> {
        rotation::rotate(&self.store, old, new).await
    }

    /// An interrupted rotation, if any. Rerun `rotate_key` with the same keys
    /// to finish it.
    pub async fn pending_rotation(&self) -> Result<Option<RotationJournal>> {
        rotation::pending_rotation(&self.store).await
    }

    pub async fn verify_integrity(&self, key: &KeyHandle) -> Result<IntegrityReport> {
        self.store.verify_all(key).await
    }

    pub fn check_security_status(&self) -> Result<AuthStatus> {
        self.monitor.check_status()
    }

    pub async fn track_auth_attempt(&self, success: bool) -> Result<AuthStatus> {
        self.monitor.track_attempt(success).await
    }

    pub async fn security_events(&self) -> Result<Vec<SecurityEvent>> {
        self.store.audit().events().await
    }

    pub async fn settings(&self, key: &KeyHandle) -> Result<UserSettings> {
        settings::load_or_init(&self.store, key).await
    }

    pub async fn save_settings(&self, key: &KeyHandle, settings: &UserSettings) -> Result<()> {
        settings::save(&self.store, key, settings).await
    }

    pub async fn rotation_recommended(&self, key: &KeyHandle) -> Result<bool> {
        let threshold = self.options.rotation_threshold;
        settings::rotation_recommended_at(&self.store, key, threshold, Utc::now()).await
    }

    pub async fn schema_version(&self) -> Result<u32> {
        schema::current_version(self.store.backend()).await
    }
}
