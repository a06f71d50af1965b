//! Re-encryption of every user-data collection from one key to another.
//!
//! Each collection is re-sealed in memory and swapped in with one
//! `replace_all`, so a collection is never half old and half new. Progress is
//! journaled in backend metadata; rerunning with the same key pair resumes.

use aegis_core::{Collection, Result, SecurityEventType, VaultError};
use aegis_storage::{envelope, KeyHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{settings, store::RecordStore};

const JOURNAL_META: &str = "rotation_journal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationJournal {
    pub started_at: DateTime<Utc>,
    /// Key ids, never key material.
    pub from_key: String,
    pub to_key: String,
    pub completed: Vec<Collection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSummary {
    pub collections: Vec<Collection>,
    pub records: usize,
    pub resumed: bool,
}

pub async fn pending_rotation(store: &RecordStore) -> Result<Option<RotationJournal>> {
    store
        .backend()
        .read_meta(JOURNAL_META)
        .await?
        .map(|value| serde_json::from_value(value).map_err(VaultError::encoding))
        .transpose()
}

/// Move all user data from `old` to `new`. A fresh rotation checks `old`
/// against a stored record first; a wrong `old` writes nothing, journal
/// included.
#[instrument(skip_all, fields(from = old.id(), to = new.id()))]
pub async fn rotate(
    store: &RecordStore,
    old: &KeyHandle,
    new: &KeyHandle,
) -> Result<RotationSummary> {
    let (mut journal, resumed) = match pending_rotation(store).await? {
        Some(journal) if journal.from_key == old.id() && journal.to_key == new.id() => {
            info!(completed = ?journal.completed, "resuming interrupted rotation");
            (journal, true)
        }
        Some(journal) => {
            return Err(VaultError::Storage {
                reason: format!(
                    "a rotation from key {} to key {} is still pending",
                    journal.from_key, journal.to_key
                ),
            })
        }
        None => {
            check_old_key(store, old).await?;
            let journal = RotationJournal {
                started_at: Utc::now(),
                from_key: old.id().to_string(),
                to_key: new.id().to_string(),
                completed: Vec::new(),
            };
            write_journal(store, Some(&journal)).await?;
            (journal, false)
        }
    };

    let mut records = 0;
    for collection in Collection::USER_DATA {
        if journal.completed.contains(&collection) {
            continue;
        }
        match rotate_collection(store, collection, old, new, resumed).await {
            Ok(count) => records += count,
            Err(err) => {
                if !resumed && records == 0 {
                    // Only empty collections were swapped; everything is still under `old`.
                    write_journal(store, None).await?;
                }
                return Err(err);
            }
        }
        journal.completed.push(collection);
        write_journal(store, Some(&journal)).await?;
    }

    let now = Utc::now();
    let mut current = settings::load_or_init(store, new).await?;
    current.security_metadata.key_created_at = now;
    current.security_metadata.last_rotation_check_at = Some(now);
    settings::save(store, new, &current).await?;

    write_journal(store, None).await?;
    store
        .audit()
        .emit(
            SecurityEventType::KeyRotation,
            json!({
                "fromKey": journal.from_key,
                "toKey": journal.to_key,
                "records": records,
                "resumed": resumed,
            }),
        )
        .await?;
    info!(records, resumed, "key rotation complete");

    Ok(RotationSummary {
        collections: Collection::USER_DATA.to_vec(),
        records,
        resumed,
    })
}

/// Open the first stored user-data record with `old`. An empty store has
/// nothing to check.
async fn check_old_key(store: &RecordStore, old: &KeyHandle) -> Result<()> {
    for collection in Collection::USER_DATA {
        let _guard = store.locks().get(collection).read().await;
        if let Some(first) = store.backend().list(collection).await?.first() {
            if let Err(err) = envelope::open(collection, first, old) {
                warn!(%collection, id = %first.id, "rotation refused: old key does not open data");
                store.report_failure(collection, &first.id, &err).await;
                return Err(err);
            }
            return Ok(());
        }
    }
    Ok(())
}

async fn rotate_collection(
    store: &RecordStore,
    collection: Collection,
    old: &KeyHandle,
    new: &KeyHandle,
    resumed: bool,
) -> Result<usize> {
    let _guard = store.locks().get(collection).write().await;
    let sealed = store.backend().list(collection).await?;
    let mut rotated = Vec::with_capacity(sealed.len());

    for record in sealed {
        let entry = match envelope::open(collection, &record, old) {
            Ok(entry) => entry,
            // Swapped before the journal caught up: already under `new`.
            Err(VaultError::Decryption { .. })
                if resumed && envelope::open(collection, &record, new).is_ok() =>
            {
                rotated.push(record);
                continue;
            }
            Err(err) => {
                warn!(%collection, id = %record.id, "rotation aborted");
                store.report_failure(collection, &record.id, &err).await;
                return Err(err);
            }
        };
        rotated.push(envelope::seal(&entry.id, &entry.record, new)?);
    }

    let count = rotated.len();
    store.backend().replace_all(collection, rotated).await?;
    info!(%collection, count, "collection re-encrypted");
    Ok(count)
}

async fn write_journal(store: &RecordStore, journal: Option<&RotationJournal>) -> Result<()> {
    let value = journal
        .map(|j| serde_json::to_value(j).map_err(VaultError::encoding))
        .transpose()?;
    store.backend().write_meta(JOURNAL_META, value).await
}
