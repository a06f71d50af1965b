//! Versioned schema upgrades. Each step creates the collections it introduces;
//! steps are idempotent and never run against a store at a newer version.

use aegis_core::{storage::RecordBackend, Collection, Result, VaultError};
use serde_json::Value;
use tracing::{info, warn};

pub const SCHEMA_VERSION: u32 = 2;
const SCHEMA_META: &str = "schema_version";

struct Migration {
    version: u32,
    collections: &'static [Collection],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        collections: &[
            Collection::Properties,
            Collection::Simulations,
            Collection::Settings,
        ],
    },
    Migration {
        version: 2,
        collections: &[Collection::SecurityAudit],
    },
];

pub async fn current_version(backend: &dyn RecordBackend) -> Result<u32> {
    match backend.read_meta(SCHEMA_META).await? {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| VaultError::Storage {
                reason: format!("unreadable schema version: {value}"),
            }),
    }
}

/// Bring the store up to [`SCHEMA_VERSION`]; returns the version it ends at.
pub async fn upgrade(backend: &dyn RecordBackend) -> Result<u32> {
    let current = current_version(backend).await?;
    if current > SCHEMA_VERSION {
        warn!(
            current,
            supported = SCHEMA_VERSION,
            "store was written by a newer schema; leaving it untouched"
        );
        return Ok(current);
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        for collection in migration.collections {
            backend.create_collection(*collection).await?;
        }
        backend
            .write_meta(SCHEMA_META, Some(Value::from(migration.version)))
            .await?;
        info!(version = migration.version, "schema upgraded");
    }
    Ok(current.max(SCHEMA_VERSION))
}

#[cfg(test)]
mod tests {
    use aegis_core::storage::InMemoryBackend;

    use super::*;

    #[tokio::test]
    async fn fresh_store_reaches_latest_version() {
        let backend = InMemoryBackend::new();
        assert_eq!(upgrade(&backend).await.expect("upgrade"), SCHEMA_VERSION);
        for collection in Collection::ALL {
            assert!(backend.has_collection(collection).await.expect("has"));
        }
    }

    #[tokio::test]
    async fn upgrade_is_idempotent_and_keeps_data() {
        let backend = InMemoryBackend::new();
        upgrade(&backend).await.expect("first");
        backend
            .put(
                Collection::Properties,
                aegis_core::StoredEnvelope {
                    id: "p".into(),
                    data: "d".into(),
                    timestamp: 0,
                    integrity_hash: "h".into(),
                },
            )
            .await
            .expect("put");

        assert_eq!(upgrade(&backend).await.expect("second"), SCHEMA_VERSION);
        assert_eq!(backend.count(Collection::Properties).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn version_one_store_gains_audit_collection() {
        let backend = InMemoryBackend::new();
        for collection in MIGRATIONS[0].collections {
            backend.create_collection(*collection).await.expect("create");
        }
        backend
            .write_meta(SCHEMA_META, Some(Value::from(1)))
            .await
            .expect("meta");

        upgrade(&backend).await.expect("upgrade");
        assert!(backend
            .has_collection(Collection::SecurityAudit)
            .await
            .expect("has"));
        assert_eq!(current_version(&backend).await.expect("version"), 2);
    }

    #[tokio::test]
    async fn newer_store_is_left_alone() {
        let backend = InMemoryBackend::new();
        backend
            .write_meta(SCHEMA_META, Some(Value::from(9)))
            .await
            .expect("meta");

        assert_eq!(upgrade(&backend).await.expect("upgrade"), 9);
        assert!(!backend
            .has_collection(Collection::Properties)
            .await
            .expect("has"));
    }
}
