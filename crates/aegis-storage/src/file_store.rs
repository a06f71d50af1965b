use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use aegis_core::{storage::RecordBackend, Collection, Result, StoredEnvelope, VaultError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

/// File-backed envelope store. One JSON file per record under
/// `<root>/collections/<name>/`, metadata under `<root>/meta/`.
/// Files hold sealed envelopes only; plaintext never reaches disk.
pub struct FileBackend {
    root: PathBuf,
    // Serializes check-then-write sequences within this process.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (or initialize) a store rooted at `root`, finishing any collection
    /// swap a previous process was interrupted in.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let backend = Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        };
        fs::create_dir_all(backend.collections_root()).map_err(storage_err)?;
        fs::create_dir_all(backend.root.join("meta")).map_err(storage_err)?;
        for collection in Collection::ALL {
            backend.recover_swap(collection)?;
        }
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collections_root(&self) -> PathBuf {
        self.root.join("collections")
    }

    fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.collections_root().join(collection.as_str())
    }

    fn staging_dir(&self, collection: Collection) -> PathBuf {
        self.collections_root()
            .join(format!(".{}.staging", collection.as_str()))
    }

    fn retired_dir(&self, collection: Collection) -> PathBuf {
        self.collections_root()
            .join(format!(".{}.retired", collection.as_str()))
    }

    fn path_for(&self, collection: Collection, id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", sanitize_key(id)))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root
            .join("meta")
            .join(format!("{}.json", sanitize_key(name)))
    }

    fn existing_dir(&self, collection: Collection) -> Result<PathBuf> {
        let dir = self.collection_dir(collection);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(VaultError::Storage {
                reason: format!("collection {collection} does not exist"),
            })
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|err| VaultError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn recover_swap(&self, collection: Collection) -> Result<()> {
        let live = self.collection_dir(collection);
        let staging = self.staging_dir(collection);
        let retired = self.retired_dir(collection);

        if staging.is_dir() {
            if live.is_dir() {
                // Swap never started: the live copy is authoritative.
                fs::remove_dir_all(&staging).map_err(storage_err)?;
            } else {
                warn!(%collection, "completing interrupted collection swap");
                fs::rename(&staging, &live).map_err(storage_err)?;
            }
        }
        if retired.is_dir() {
            fs::remove_dir_all(&retired).map_err(storage_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for FileBackend {
    async fn create_collection(&self, collection: Collection) -> Result<()> {
        fs::create_dir_all(self.collection_dir(collection)).map_err(storage_err)
    }

    async fn has_collection(&self, collection: Collection) -> Result<bool> {
        Ok(self.collection_dir(collection).is_dir())
    }

    #[instrument(skip_all, fields(%collection, id = %envelope.id))]
    async fn put(&self, collection: Collection, envelope: StoredEnvelope) -> Result<()> {
        self.existing_dir(collection)?;
        let _guard = self.lock()?;
        write_json(&self.path_for(collection, &envelope.id), &envelope)
    }

    #[instrument(skip_all, fields(%collection, id = %envelope.id))]
    async fn replace(&self, collection: Collection, envelope: StoredEnvelope) -> Result<()> {
        self.existing_dir(collection)?;
        let _guard = self.lock()?;
        let path = self.path_for(collection, &envelope.id);
        if !path.is_file() {
            return Err(VaultError::NotFound {
                collection,
                id: envelope.id,
            });
        }
        write_json(&path, &envelope)
    }

    #[instrument(skip_all, fields(%collection, %id))]
    async fn get(&self, collection: Collection, id: &str) -> Result<StoredEnvelope> {
        self.existing_dir(collection)?;
        read_json::<StoredEnvelope>(&self.path_for(collection, id))?.ok_or_else(|| {
            VaultError::NotFound {
                collection,
                id: id.to_string(),
            }
        })
    }

    #[instrument(skip_all, fields(%collection))]
    async fn list(&self, collection: Collection) -> Result<Vec<StoredEnvelope>> {
        let dir = self.existing_dir(collection)?;
        let mut envelopes = Vec::new();
        for path in record_files(&dir)? {
            // A concurrent delete between listing and reading is not an error.
            if let Some(envelope) = read_json::<StoredEnvelope>(&path)? {
                envelopes.push(envelope);
            }
        }
        envelopes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(envelopes)
    }

    async fn ids(&self, collection: Collection) -> Result<Vec<String>> {
        let dir = self.existing_dir(collection)?;
        let mut ids = record_files(&dir)?
            .iter()
            .map(|path| id_from_path(path))
            .collect::<Result<Vec<_>>>()?;
        ids.sort();
        Ok(ids)
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let dir = self.existing_dir(collection)?;
        Ok(record_files(&dir)?.len())
    }

    #[instrument(skip_all, fields(%collection, %id))]
    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.existing_dir(collection)?;
        let _guard = self.lock()?;
        match fs::remove_file(self.path_for(collection, id)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(err)),
        }
    }

    #[instrument(skip_all, fields(%collection, count = envelopes.len()))]
    async fn replace_all(
        &self,
        collection: Collection,
        envelopes: Vec<StoredEnvelope>,
    ) -> Result<()> {
        let live = self.existing_dir(collection)?;
        let _guard = self.lock()?;
        let staging = self.staging_dir(collection);
        let retired = self.retired_dir(collection);

        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(storage_err)?;
        }
        fs::create_dir_all(&staging).map_err(storage_err)?;
        for envelope in &envelopes {
            let path = staging.join(format!("{}.json", sanitize_key(&envelope.id)));
            write_json(&path, envelope)?;
        }

        fs::rename(&live, &retired).map_err(storage_err)?;
        fs::rename(&staging, &live).map_err(storage_err)?;
        fs::remove_dir_all(&retired).map_err(storage_err)?;
        debug!("collection swapped");
        Ok(())
    }

    async fn read_meta(&self, name: &str) -> Result<Option<Value>> {
        read_json(&self.meta_path(name))
    }

    async fn write_meta(&self, name: &str, value: Option<Value>) -> Result<()> {
        let _guard = self.lock()?;
        let path = self.meta_path(name);
        match value {
            Some(value) => write_json(&path, &value),
            None => match fs::remove_file(path) {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(storage_err(err)),
            },
        }
    }
}

fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(storage_err)? {
        let path = entry.map_err(storage_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| VaultError::Storage {
        reason: "invalid storage path".to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(value).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

fn sanitize_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

fn id_from_path(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| storage_err(format!("unreadable record name {}", path.display())))?;
    let raw = URL_SAFE_NO_PAD.decode(stem).map_err(storage_err)?;
    String::from_utf8(raw).map_err(storage_err)
}

fn storage_err<E: ToString>(err: E) -> VaultError {
    VaultError::Storage {
        reason: err.to_string(),
    }
}
