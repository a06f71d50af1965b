//! Encrypted single-collection backups.
//!
//! File layout: one line of JSON header, a newline, then the base64 blob of
//! the sealed payload.

use aegis_core::{Collection, Entry, Result, SecurityEventType, VaultError};
use aegis_storage::{codec, KeyHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::store::RecordStore;

pub const EXPORT_FORMAT: &str = "AEG-EXPORT";
pub const EXPORT_VERSION: u32 = 1;
pub const CONTENT_TYPE: &str = "application/json+encrypted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportHeader {
    pub format: String,
    #[serde(default)]
    pub version: Option<u32>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ExportHeader {
    fn current(now: DateTime<Utc>) -> Self {
        Self {
            format: EXPORT_FORMAT.to_string(),
            version: Some(EXPORT_VERSION),
            timestamp: Some(now.timestamp_millis()),
            content_type: Some(CONTENT_TYPE.to_string()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.format != EXPORT_FORMAT {
            return Err(invalid(format!("unknown format {:?}", self.format)));
        }
        match self.version {
            None => Err(invalid("missing version")),
            Some(v) if v == 0 || v > EXPORT_VERSION => {
                Err(invalid(format!("unsupported version {v}")))
            }
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportPayload {
    collection: Collection,
    exported_at: DateTime<Utc>,
    records: Vec<Entry<Value>>,
}

/// Parse and check the header line without touching the body.
pub fn read_header(contents: &str) -> Result<(ExportHeader, &str)> {
    let (line, body) = contents
        .split_once('\n')
        .ok_or_else(|| invalid("missing header separator"))?;
    let header: ExportHeader =
        serde_json::from_str(line.trim_end_matches('\r')).map_err(|e| invalid(e.to_string()))?;
    header.validate()?;
    Ok((header, body.trim()))
}

#[instrument(skip_all, fields(%collection))]
pub async fn export_collection(
    store: &RecordStore,
    collection: Collection,
    key: &KeyHandle,
) -> Result<String> {
    let records = store.get_all::<Value>(collection, key).await?;
    let now = Utc::now();
    let count = records.len();
    let payload = ExportPayload {
        collection,
        exported_at: now,
        records,
    };

    let header = serde_json::to_string(&ExportHeader::current(now)).map_err(VaultError::encoding)?;
    let body = codec::encrypt(&payload, key)?;
    info!(count, "collection exported");
    Ok(format!("{header}\n{body}"))
}

/// Restore an export into `collection`, overwriting records with the same id.
/// Returns the number of records written.
#[instrument(skip_all, fields(%collection))]
pub async fn import_collection(
    store: &RecordStore,
    collection: Collection,
    contents: &str,
    key: &KeyHandle,
) -> Result<usize> {
    if !collection.is_user_data() {
        return Err(VaultError::ReadOnlyCollection { collection });
    }
    let (_, body) = read_header(contents)?;

    let payload: ExportPayload = match codec::decrypt(body, key) {
        Ok(payload) => payload,
        Err(err) => {
            if let VaultError::Decryption { .. } = err {
                store
                    .audit()
                    .emit_quietly(
                        SecurityEventType::DecryptionFailure,
                        json!({ "collection": collection, "source": "import" }),
                    )
                    .await;
            }
            return Err(err);
        }
    };
    if payload.collection != collection {
        return Err(invalid(format!(
            "export holds {} records, not {collection}",
            payload.collection
        )));
    }

    let count = payload.records.len();
    for entry in &payload.records {
        store.upsert(collection, &entry.id, &entry.record, key).await?;
    }
    store
        .audit()
        .emit(
            SecurityEventType::DataImport,
            json!({ "collection": collection, "count": count }),
        )
        .await?;
    info!(count, "collection imported");
    Ok(count)
}

fn invalid(reason: impl Into<String>) -> VaultError {
    VaultError::InvalidImportFormat {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aegis_core::{
        records::PropertyRecord,
        storage::{InMemoryBackend, RecordBackend},
    };
    use aegis_storage::generate_ephemeral_key;

    use super::*;
    use crate::{
        audit::{AuditLog, AuditRetention},
        schema,
    };

    async fn store() -> (Arc<InMemoryBackend>, RecordStore) {
        let backend = Arc::new(InMemoryBackend::new());
        schema::upgrade(backend.as_ref()).await.expect("schema");
        let audit = Arc::new(AuditLog::new(
            backend.clone(),
            generate_ephemeral_key().expect("key"),
            AuditRetention::default(),
        ));
        (backend.clone(), RecordStore::new(backend, audit))
    }

    fn property(address: &str) -> PropertyRecord {
        PropertyRecord {
            address: address.into(),
            purchase_price: 850_000.0,
            current_value: None,
            monthly_rent: Some(4_200.0),
            notes: None,
        }
    }

    #[test]
    fn header_has_the_documented_shape() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let header = serde_json::to_string(&ExportHeader::current(now)).expect("header");
        assert_eq!(
            header,
            format!(
                concat!(
                    r#"{{"format":"AEG-EXPORT","version":1,"timestamp":{},"#,
                    r#""contentType":"application/json+encrypted"}}"#,
                ),
                now.timestamp_millis()
            )
        );
    }

    #[test]
    fn header_checks() {
        for contents in [
            "{\"format\":\"OTHER\",\"version\":1}\nAAAA",
            "{\"format\":\"AEG-EXPORT\"}\nAAAA",
            "{\"format\":\"AEG-EXPORT\",\"version\":2}\nAAAA",
            "{\"format\":\"AEG-EXPORT\",\"version\":1}",
            "not json\nAAAA",
        ] {
            assert!(
                matches!(
                    read_header(contents),
                    Err(VaultError::InvalidImportFormat { .. })
                ),
                "accepted {contents:?}"
            );
        }

        let (header, body) =
            read_header("{\"format\":\"AEG-EXPORT\",\"version\":1}\r\nAAAA\n").expect("valid");
        assert_eq!(header.version, Some(1));
        assert_eq!(body, "AAAA");
    }

    #[tokio::test]
    async fn export_then_import_restores_the_collection() {
        let (_, source) = store().await;
        let key = generate_ephemeral_key().expect("key");
        for address in ["Rua X", "Rua Y", "Rua Z"] {
            source
                .create(Collection::Properties, &property(address), &key)
                .await
                .expect("create");
        }
        let original: Vec<Entry<PropertyRecord>> = source
            .get_all(Collection::Properties, &key)
            .await
            .expect("get_all");

        let exported = export_collection(&source, Collection::Properties, &key)
            .await
            .expect("export");
        assert!(!exported.contains("Rua X"));

        let (_, target) = store().await;
        let count = import_collection(&target, Collection::Properties, &exported, &key)
            .await
            .expect("import");
        assert_eq!(count, 3);

        let restored: Vec<Entry<PropertyRecord>> = target
            .get_all(Collection::Properties, &key)
            .await
            .expect("get_all");
        assert_eq!(restored, original);

        let events = target.audit().events().await.expect("events");
        assert!(events
            .iter()
            .any(|e| e.event_type == SecurityEventType::DataImport));
    }

    #[tokio::test]
    async fn foreign_format_writes_nothing() {
        let (backend, store) = store().await;
        let key = generate_ephemeral_key().expect("key");
        let contents = concat!(
            r#"{"format":"OTHER","version":1,"timestamp":0,"#,
            r#""contentType":"application/json+encrypted"}"#,
            "\nAAAA",
        );

        let err = import_collection(&store, Collection::Properties, contents, &key)
            .await
            .expect_err("rejected");
        assert!(matches!(err, VaultError::InvalidImportFormat { .. }));
        assert_eq!(backend.count(Collection::Properties).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn wrong_key_or_collection_is_rejected() {
        let (_, source) = store().await;
        let key = generate_ephemeral_key().expect("key");
        source
            .create(Collection::Properties, &property("Rua X"), &key)
            .await
            .expect("create");
        let exported = export_collection(&source, Collection::Properties, &key)
            .await
            .expect("export");

        let (backend, target) = store().await;
        let other = generate_ephemeral_key().expect("key");
        let err = import_collection(&target, Collection::Properties, &exported, &other)
            .await
            .expect_err("wrong key");
        assert!(matches!(err, VaultError::Decryption { .. }));

        let err = import_collection(&target, Collection::Simulations, &exported, &key)
            .await
            .expect_err("wrong collection");
        assert!(matches!(err, VaultError::InvalidImportFormat { .. }));

        let err = import_collection(&target, Collection::SecurityAudit, &exported, &key)
            .await
            .expect_err("audit");
        assert!(matches!(err, VaultError::ReadOnlyCollection { .. }));
        assert_eq!(backend.count(Collection::Simulations).await.expect("count"), 0);
    }
}
