//! Per-collection record store: seal on write, verify on read, audit both.
//!
//! Ordinary operations hold a collection's read guard; key rotation holds the
//! write guard, so nothing reads a collection while it is being re-encrypted.
//! Operations on the same id are otherwise unordered: concurrent updates race
//! and the last completed write wins.
//!
//! A write counts only once its audit event is recorded. If the event cannot
//! be written, the data change is undone and the audit error is returned, so
//! a failed call leaves the collection as it was and is safe to retry.

use std::sync::Arc;

use aegis_core::{
    storage::RecordBackend, Collection, Entry, Result, SecurityEventType, StoredEnvelope,
    VaultError,
};
use aegis_storage::{envelope, KeyHandle};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditLog;

#[derive(Default)]
pub(crate) struct CollectionLocks {
    properties: RwLock<()>,
    simulations: RwLock<()>,
    settings: RwLock<()>,
    security_audit: RwLock<()>,
}

impl CollectionLocks {
    pub(crate) fn get(&self, collection: Collection) -> &RwLock<()> {
        match collection {
            Collection::Properties => &self.properties,
            Collection::Simulations => &self.simulations,
            Collection::Settings => &self.settings,
            Collection::SecurityAudit => &self.security_audit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub collection: Collection,
    pub id: String,
}

/// Outcome of a full integrity sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    pub violations: Vec<RecordRef>,
    pub decryption_failures: Vec<RecordRef>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.decryption_failures.is_empty()
    }
}

pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    audit: Arc<AuditLog>,
    locks: CollectionLocks,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn RecordBackend>, audit: Arc<AuditLog>) -> Self {
        Self {
            backend,
            audit,
            locks: CollectionLocks::default(),
        }
    }

    pub(crate) fn backend(&self) -> &dyn RecordBackend {
        self.backend.as_ref()
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn locks(&self) -> &CollectionLocks {
        &self.locks
    }

    /// Store a new record under a fresh id and return the id.
    #[instrument(skip_all, fields(%collection))]
    pub async fn create<T: Serialize + Sync>(
        &self,
        collection: Collection,
        record: &T,
        key: &KeyHandle,
    ) -> Result<String> {
        ensure_writable(collection)?;
        let _guard = self.locks.get(collection).read().await;
        let id = Uuid::new_v4().to_string();
        let sealed = envelope::seal(&id, record, key)?;
        self.backend.put(collection, sealed).await?;
        self.audit_or_undo(
            collection,
            &id,
            None,
            SecurityEventType::DataWrite,
            json!({ "collection": collection, "id": id, "operation": "create" }),
        )
        .await?;
        debug!(%id, "record created");
        Ok(id)
    }

    /// Overwrite an existing record. Not an upsert: a missing id is
    /// `NotFound` and nothing is written.
    #[instrument(skip_all, fields(%collection, %id))]
    pub async fn update<T: Serialize + Sync>(
        &self,
        collection: Collection,
        id: &str,
        record: &T,
        key: &KeyHandle,
    ) -> Result<()> {
        ensure_writable(collection)?;
        let _guard = self.locks.get(collection).read().await;
        let sealed = envelope::seal(id, record, key)?;
        let previous = self.backend.get(collection, id).await?;
        self.backend.replace(collection, sealed).await?;
        self.audit_or_undo(
            collection,
            id,
            Some(previous),
            SecurityEventType::DataWrite,
            json!({ "collection": collection, "id": id, "operation": "update" }),
        )
        .await
    }

    /// Create-or-overwrite under a caller-chosen id (settings, imports).
    pub(crate) async fn upsert<T: Serialize + Sync>(
        &self,
        collection: Collection,
        id: &str,
        record: &T,
        key: &KeyHandle,
    ) -> Result<()> {
        ensure_writable(collection)?;
        let _guard = self.locks.get(collection).read().await;
        let sealed = envelope::seal(id, record, key)?;
        self.backend.put(collection, sealed).await
    }

    #[instrument(skip_all, fields(%collection, %id))]
    pub async fn get<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        id: &str,
        key: &KeyHandle,
    ) -> Result<Entry<T>> {
        let _guard = self.locks.get(collection).read().await;
        let sealed = self.backend.get(collection, id).await?;
        let entry = self.open_checked(collection, &sealed, key).await?;
        if collection.is_user_data() {
            self.audit
                .emit(
                    SecurityEventType::DataAccess,
                    json!({ "collection": collection, "id": id }),
                )
                .await?;
        }
        Ok(entry)
    }

    /// Every record of the collection. One bad record fails the whole read.
    #[instrument(skip_all, fields(%collection))]
    pub async fn get_all<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        key: &KeyHandle,
    ) -> Result<Vec<Entry<T>>> {
        let _guard = self.locks.get(collection).read().await;
        let sealed = self.backend.list(collection).await?;
        let mut entries = Vec::with_capacity(sealed.len());
        for envelope in &sealed {
            entries.push(self.open_checked(collection, envelope, key).await?);
        }
        if collection.is_user_data() {
            self.audit
                .emit(
                    SecurityEventType::DataAccess,
                    json!({ "collection": collection, "count": entries.len() }),
                )
                .await?;
        }
        Ok(entries)
    }

    /// Remove a record (idempotent).
    #[instrument(skip_all, fields(%collection, %id))]
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        ensure_writable(collection)?;
        let _guard = self.locks.get(collection).read().await;
        let previous = match self.backend.get(collection, id).await {
            Ok(previous) => Some(previous),
            Err(VaultError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        self.backend.delete(collection, id).await?;
        self.audit_or_undo(
            collection,
            id,
            previous,
            SecurityEventType::DataDeletion,
            json!({ "collection": collection, "id": id }),
        )
        .await
    }

    /// Record the audit event for a write that has already reached the
    /// backend. On failure, restore `previous` (or remove the record when
    /// there was none) and return the audit error.
    async fn audit_or_undo(
        &self,
        collection: Collection,
        id: &str,
        previous: Option<StoredEnvelope>,
        event_type: SecurityEventType,
        details: Value,
    ) -> Result<()> {
        let Err(err) = self.audit.emit(event_type, details).await else {
            return Ok(());
        };
        let undo = match previous {
            Some(previous) => self.backend.put(collection, previous).await,
            None => self.backend.delete(collection, id).await,
        };
        match undo {
            Ok(()) => warn!(%collection, %id, %err, "audit failed; write undone"),
            Err(undo_err) => {
                warn!(%collection, %id, %err, %undo_err, "audit failed; write not undone");
            }
        }
        Err(err)
    }

    /// Decrypt and verify every user-data record without stopping at the first
    /// failure.
    #[instrument(skip_all)]
    pub async fn verify_all(&self, key: &KeyHandle) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();
        for collection in Collection::USER_DATA {
            let _guard = self.locks.get(collection).read().await;
            for sealed in self.backend.list(collection).await? {
                report.checked += 1;
                let record = RecordRef {
                    collection,
                    id: sealed.id.clone(),
                };
                match self.open_checked::<Value>(collection, &sealed, key).await {
                    Ok(_) => {}
                    Err(VaultError::IntegrityViolation { .. }) => report.violations.push(record),
                    Err(VaultError::Decryption { .. }) => report.decryption_failures.push(record),
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(report)
    }

    /// Open an envelope; security-relevant failures are audited before they
    /// propagate. The audit collection is always opened with the device key.
    pub(crate) async fn open_checked<T: DeserializeOwned>(
        &self,
        collection: Collection,
        sealed: &StoredEnvelope,
        key: &KeyHandle,
    ) -> Result<Entry<T>> {
        let key = if collection.is_user_data() {
            key
        } else {
            self.audit.key()
        };
        match envelope::open_as::<T>(collection, sealed, key) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.report_failure(collection, &sealed.id, &err).await;
                Err(err)
            }
        }
    }

    pub(crate) async fn report_failure(&self, collection: Collection, id: &str, err: &VaultError) {
        let event_type = match err {
            VaultError::IntegrityViolation { .. } => SecurityEventType::DataIntegrityViolation,
            VaultError::Decryption { .. } => SecurityEventType::DecryptionFailure,
            _ => return,
        };
        warn!(%collection, %id, ?event_type, "record failed verification");
        self.audit
            .emit_quietly(event_type, json!({ "collection": collection, "id": id }))
            .await;
    }
}

fn ensure_writable(collection: Collection) -> Result<()> {
    if collection.is_user_data() {
        Ok(())
    } else {
        Err(VaultError::ReadOnlyCollection { collection })
    }
}
