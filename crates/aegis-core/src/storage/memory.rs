use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::Value;

use super::RecordBackend;
use crate::{
    error::{Result, VaultError},
    model::{Collection, StoredEnvelope},
};

/// In-memory backend for tests, demo sessions and smoke runs.
/// Contents vanish with the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<Collection, BTreeMap<String, StoredEnvelope>>,
    meta: HashMap<String, Value>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.inner.lock().map_err(|err| VaultError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl State {
    fn collection_mut(
        &mut self,
        collection: Collection,
    ) -> Result<&mut BTreeMap<String, StoredEnvelope>> {
        self.collections
            .get_mut(&collection)
            .ok_or_else(|| missing_collection(collection))
    }

    fn collection(&self, collection: Collection) -> Result<&BTreeMap<String, StoredEnvelope>> {
        self.collections
            .get(&collection)
            .ok_or_else(|| missing_collection(collection))
    }
}

fn missing_collection(collection: Collection) -> VaultError {
    VaultError::Storage {
        reason: format!("collection {collection} does not exist"),
    }
}

#[async_trait]
impl RecordBackend for InMemoryBackend {
    async fn create_collection(&self, collection: Collection) -> Result<()> {
        self.lock()?.collections.entry(collection).or_default();
        Ok(())
    }

    async fn has_collection(&self, collection: Collection) -> Result<bool> {
        Ok(self.lock()?.collections.contains_key(&collection))
    }

    async fn put(&self, collection: Collection, envelope: StoredEnvelope) -> Result<()> {
        let mut state = self.lock()?;
        state
            .collection_mut(collection)?
            .insert(envelope.id.clone(), envelope);
        Ok(())
    }

    async fn replace(&self, collection: Collection, envelope: StoredEnvelope) -> Result<()> {
        let mut state = self.lock()?;
        let entries = state.collection_mut(collection)?;
        match entries.get_mut(&envelope.id) {
            Some(slot) => {
                *slot = envelope;
                Ok(())
            }
            None => Err(VaultError::NotFound {
                collection,
                id: envelope.id,
            }),
        }
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<StoredEnvelope> {
        let state = self.lock()?;
        state
            .collection(collection)?
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                collection,
                id: id.to_string(),
            })
    }

    async fn list(&self, collection: Collection) -> Result<Vec<StoredEnvelope>> {
        let state = self.lock()?;
        Ok(state.collection(collection)?.values().cloned().collect())
    }

    async fn ids(&self, collection: Collection) -> Result<Vec<String>> {
        Ok(self.lock()?.collection(collection)?.keys().cloned().collect())
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.lock()?.collection(collection)?.len())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.collection_mut(collection)?.remove(id);
        Ok(())
    }

    async fn replace_all(
        &self,
        collection: Collection,
        envelopes: Vec<StoredEnvelope>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let entries = state.collection_mut(collection)?;
        *entries = envelopes
            .into_iter()
            .map(|envelope| (envelope.id.clone(), envelope))
            .collect();
        Ok(())
    }

    async fn read_meta(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.meta.get(name).cloned())
    }

    async fn write_meta(&self, name: &str, value: Option<Value>) -> Result<()> {
        let mut state = self.lock()?;
        match value {
            Some(value) => state.meta.insert(name.to_string(), value),
            None => state.meta.remove(name),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(id: &str, data: &str) -> StoredEnvelope {
        StoredEnvelope {
            id: id.to_string(),
            data: data.to_string(),
            timestamp: 0,
            integrity_hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let backend = InMemoryBackend::new();
        backend
            .create_collection(Collection::Properties)
            .await
            .expect("create");
        backend
            .put(Collection::Properties, envelope("a", "one"))
            .await
            .expect("put");

        let stored = backend.get(Collection::Properties, "a").await.expect("get");
        assert_eq!(stored.data, "one");

        backend
            .delete(Collection::Properties, "a")
            .await
            .expect("delete");
        backend
            .delete(Collection::Properties, "a")
            .await
            .expect("delete again should still succeed");
        let err = backend
            .get(Collection::Properties, "a")
            .await
            .expect_err("gone");
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[tokio::test]
    async fn replace_requires_existing_entry() {
        let backend = InMemoryBackend::new();
        backend
            .create_collection(Collection::Settings)
            .await
            .expect("create");

        let err = backend
            .replace(Collection::Settings, envelope("missing", "x"))
            .await
            .expect_err("replace of missing id");
        assert!(matches!(err, VaultError::NotFound { .. }));
        assert_eq!(backend.count(Collection::Settings).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn unknown_collection_is_a_storage_error() {
        let backend = InMemoryBackend::new();
        let err = backend
            .list(Collection::Simulations)
            .await
            .expect_err("collection was never created");
        assert!(matches!(err, VaultError::Storage { .. }));
    }

    #[tokio::test]
    async fn meta_write_and_clear() {
        let backend = InMemoryBackend::new();
        backend
            .write_meta("schema_version", Some(Value::from(2)))
            .await
            .expect("write");
        assert_eq!(
            backend.read_meta("schema_version").await.expect("read"),
            Some(Value::from(2))
        );
        backend
            .write_meta("schema_version", None)
            .await
            .expect("clear");
        assert_eq!(backend.read_meta("schema_version").await.expect("read"), None);
    }
}
