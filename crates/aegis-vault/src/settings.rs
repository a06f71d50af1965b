use aegis_core::{
    records::{UserSettings, SETTINGS_ID},
    Collection, Result, VaultError,
};
use aegis_storage::KeyHandle;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::store::RecordStore;

/// Keys older than this should be rotated.
pub const DEFAULT_ROTATION_THRESHOLD_DAYS: i64 = 90;

/// Load the settings record, writing the defaults on first use.
pub async fn load_or_init(store: &RecordStore, key: &KeyHandle) -> Result<UserSettings> {
    match store
        .get::<UserSettings>(Collection::Settings, SETTINGS_ID, key)
        .await
    {
        Ok(entry) => Ok(entry.record),
        Err(VaultError::NotFound { .. }) => {
            let settings = UserSettings::default();
            save(store, key, &settings).await?;
            debug!("initialized default settings");
            Ok(settings)
        }
        Err(err) => Err(err),
    }
}

pub async fn save(store: &RecordStore, key: &KeyHandle, settings: &UserSettings) -> Result<()> {
    store
        .upsert(Collection::Settings, SETTINGS_ID, settings, key)
        .await
}

/// Stamp the check time and report whether the key has outlived `threshold`.
pub async fn rotation_recommended_at(
    store: &RecordStore,
    key: &KeyHandle,
    threshold: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut settings = load_or_init(store, key).await?;
    settings.security_metadata.last_rotation_check_at = Some(now);
    save(store, key, &settings).await?;
    Ok(now - settings.security_metadata.key_created_at > threshold)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aegis_core::storage::InMemoryBackend;
    use aegis_storage::generate_ephemeral_key;

    use super::*;
    use crate::{
        audit::{AuditLog, AuditRetention},
        schema,
    };

    async fn store() -> RecordStore {
        let backend = Arc::new(InMemoryBackend::new());
        schema::upgrade(backend.as_ref()).await.expect("schema");
        let audit = Arc::new(AuditLog::new(
            backend.clone(),
            generate_ephemeral_key().expect("key"),
            AuditRetention::default(),
        ));
        RecordStore::new(backend, audit)
    }

    #[tokio::test]
    async fn first_load_writes_defaults() {
        let store = store().await;
        let key = generate_ephemeral_key().expect("key");

        let settings = load_or_init(&store, &key).await.expect("load");
        assert_eq!(settings.currency, "BRL");

        let again = load_or_init(&store, &key).await.expect("reload");
        assert_eq!(again, settings);
    }

    #[tokio::test]
    async fn old_key_is_flagged_for_rotation() {
        let store = store().await;
        let key = generate_ephemeral_key().expect("key");
        let created = Utc::now() - Duration::days(120);
        save(&store, &key, &UserSettings::with_key_created_at(created))
            .await
            .expect("save");

        let now = Utc::now();
        let threshold = Duration::days(DEFAULT_ROTATION_THRESHOLD_DAYS);
        assert!(rotation_recommended_at(&store, &key, threshold, now)
            .await
            .expect("check"));

        let settings = load_or_init(&store, &key).await.expect("load");
        assert_eq!(settings.security_metadata.last_rotation_check_at, Some(now));
    }

    #[tokio::test]
    async fn fresh_key_is_not_flagged() {
        let store = store().await;
        let key = generate_ephemeral_key().expect("key");
        let threshold = Duration::days(DEFAULT_ROTATION_THRESHOLD_DAYS);
        assert!(!rotation_recommended_at(&store, &key, threshold, Utc::now())
            .await
            .expect("check"));
    }
}
