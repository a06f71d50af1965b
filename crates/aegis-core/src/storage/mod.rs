//! Persistence contract for sealed envelopes.
//!
//! Backends never see plaintext or keys; they move opaque envelopes and a
//! small amount of unencrypted metadata (schema version, KDF salts, the
//! rotation journal).

mod memory;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::InMemoryBackend;

use crate::{
    error::Result,
    model::{Collection, StoredEnvelope},
};

#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Create the collection if absent (idempotent).
    async fn create_collection(&self, collection: Collection) -> Result<()>;

    async fn has_collection(&self, collection: Collection) -> Result<bool>;

    /// Persist an envelope, overwriting any entry with the same id.
    async fn put(&self, collection: Collection, envelope: StoredEnvelope) -> Result<()>;

    /// Overwrite an existing envelope; fails with `NotFound` and writes
    /// nothing if the id is absent. The check and the write are one step.
    async fn replace(&self, collection: Collection, envelope: StoredEnvelope) -> Result<()>;

    async fn get(&self, collection: Collection, id: &str) -> Result<StoredEnvelope>;

    /// All envelopes of a collection, ordered by id.
    async fn list(&self, collection: Collection) -> Result<Vec<StoredEnvelope>>;

    /// Ids of a collection, ordered. Reads no envelope contents.
    async fn ids(&self, collection: Collection) -> Result<Vec<String>>;

    async fn count(&self, collection: Collection) -> Result<usize>;

    /// Remove an envelope (idempotent).
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// Swap the whole content of a collection in one step.
    async fn replace_all(&self, collection: Collection, envelopes: Vec<StoredEnvelope>)
        -> Result<()>;

    async fn read_meta(&self, name: &str) -> Result<Option<Value>>;

    /// Write (`Some`) or clear (`None`) a metadata value.
    async fn write_meta(&self, name: &str, value: Option<Value>) -> Result<()>;
}
