//! Sealing and opening of persisted envelopes: digest, encrypt, and the
//! fail-closed verification path on read.

use aegis_core::{Collection, Entry, Result, StoredEnvelope, VaultError};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{codec, integrity, key_provider::KeyHandle};

/// Build the envelope for `record` stored under `id`. The digest covers the
/// plaintext entry including its id.
pub fn seal<T: Serialize>(id: &str, record: &T, key: &KeyHandle) -> Result<StoredEnvelope> {
    let entry = serde_json::to_value(Entry {
        id: id.to_string(),
        record,
    })
    .map_err(VaultError::encoding)?;

    Ok(StoredEnvelope {
        id: id.to_string(),
        integrity_hash: integrity::digest(&entry)?,
        data: codec::encrypt(&entry, key)?,
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// Decrypt and verify an envelope. Never returns unverified data.
pub fn open(
    collection: Collection,
    envelope: &StoredEnvelope,
    key: &KeyHandle,
) -> Result<Entry<Value>> {
    let plaintext: Value = codec::decrypt(&envelope.data, key)?;
    let violation = || VaultError::IntegrityViolation {
        collection,
        id: envelope.id.clone(),
    };

    if !integrity::verify(&plaintext, &envelope.integrity_hash)? {
        return Err(violation());
    }
    let entry: Entry<Value> = serde_json::from_value(plaintext).map_err(|_| violation())?;
    // A blob moved under another id carries a valid digest but the wrong id.
    if entry.id != envelope.id {
        return Err(violation());
    }
    Ok(entry)
}

pub fn open_as<T: DeserializeOwned>(
    collection: Collection,
    envelope: &StoredEnvelope,
    key: &KeyHandle,
) -> Result<Entry<T>> {
    let entry = open(collection, envelope, key)?;
    Ok(Entry {
        id: entry.id,
        record: serde_json::from_value(entry.record).map_err(VaultError::encoding)?,
    })
}
