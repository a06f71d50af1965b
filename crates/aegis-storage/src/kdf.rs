//! Password-based key derivation (PBKDF2-HMAC-SHA256) with a persisted,
//! stable per-user salt.

use aegis_core::{storage::RecordBackend, Result, VaultError};
use base64::{engine::general_purpose, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::key_provider::{KeyHandle, KeyOrigin, KEY_LEN};

pub const MIN_ITERATIONS: u32 = 310_000;
pub const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    /// Rejects iteration counts below the floor; there is no weaker fallback.
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < MIN_ITERATIONS {
            return Err(VaultError::Derivation {
                reason: format!("{iterations} iterations is below the minimum of {MIN_ITERATIONS}"),
            });
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

/// Stretch `identifier || password` with the given salt. Deterministic.
pub fn derive_key_with_salt(
    identifier: &str,
    password: &str,
    salt: &[u8],
    params: KdfParams,
) -> KeyHandle {
    let mut material = Zeroizing::new(Vec::with_capacity(identifier.len() + password.len()));
    material.extend_from_slice(identifier.as_bytes());
    material.extend_from_slice(password.as_bytes());

    let mut secret = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(&material, salt, params.iterations, &mut secret[..]);
    KeyHandle::from_secret(secret, KeyOrigin::Password)
}

/// Derive the user's key, creating and persisting their salt on first use.
/// The stretching runs on the blocking pool.
#[instrument(skip_all)]
pub async fn derive_key(
    backend: &dyn RecordBackend,
    identifier: &str,
    password: &str,
    params: KdfParams,
) -> Result<KeyHandle> {
    let salt = load_or_create_salt(backend, identifier).await?;
    let identifier = identifier.to_owned();
    let password = Zeroizing::new(password.to_owned());

    let key = tokio::task::spawn_blocking(move || {
        derive_key_with_salt(&identifier, &password, &salt, params)
    })
    .await
    .map_err(|e| VaultError::Derivation {
        reason: format!("derivation task failed: {e}"),
    })?;
    debug!(key_id = key.id(), "derived password key");
    Ok(key)
}

fn salt_meta_name(identifier: &str) -> String {
    format!(
        "kdf-salt:{}",
        hex::encode(Sha256::digest(identifier.as_bytes()))
    )
}

async fn load_or_create_salt(
    backend: &dyn RecordBackend,
    identifier: &str,
) -> Result<[u8; SALT_LEN]> {
    let name = salt_meta_name(identifier);
    if let Some(stored) = backend.read_meta(&name).await? {
        return decode_salt(&stored);
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| VaultError::Derivation {
            reason: format!("system randomness unavailable: {e}"),
        })?;
    backend
        .write_meta(
            &name,
            Some(json!({ "salt": general_purpose::STANDARD.encode(salt) })),
        )
        .await?;
    debug!("created salt for new identifier");
    Ok(salt)
}

fn decode_salt(stored: &serde_json::Value) -> Result<[u8; SALT_LEN]> {
    let encoded = stored
        .get("salt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VaultError::Derivation {
            reason: "stored salt is malformed".to_string(),
        })?;
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::Derivation {
            reason: format!("stored salt decode failed: {e}"),
        })?;
    bytes.try_into().map_err(|bytes: Vec<u8>| VaultError::Derivation {
        reason: format!("expected {SALT_LEN} salt bytes, got {}", bytes.len()),
    })
}

#[cfg(test)]
mod tests {
    use aegis_core::storage::InMemoryBackend;

    use super::*;

    #[test]
    fn rejects_weak_iteration_counts() {
        let err = KdfParams::new(1_000).expect_err("too weak");
        assert!(matches!(err, VaultError::Derivation { .. }));
        assert_eq!(KdfParams::default().iterations(), MIN_ITERATIONS);
    }

    #[test]
    fn same_inputs_derive_same_key() {
        let salt = [7u8; SALT_LEN];
        let params = KdfParams::default();
        let a = derive_key_with_salt("user-1", "hunter2", &salt, params);
        let b = derive_key_with_salt("user-1", "hunter2", &salt, params);
        let c = derive_key_with_salt("user-1", "hunter3", &salt, params);

        assert_eq!(a.expose(), b.expose());
        assert_ne!(a.expose(), c.expose());
        assert_eq!(a.origin(), KeyOrigin::Password);
    }

    #[tokio::test]
    async fn salt_is_persisted_and_reused() {
        let backend = InMemoryBackend::new();
        let params = KdfParams::default();

        let first = derive_key(&backend, "user-1", "pw", params)
            .await
            .expect("derive");
        let second = derive_key(&backend, "user-1", "pw", params)
            .await
            .expect("derive again");
        assert_eq!(first.expose(), second.expose());

        let stored = backend
            .read_meta(&salt_meta_name("user-1"))
            .await
            .expect("meta")
            .expect("salt stored");
        assert_eq!(decode_salt(&stored).expect("decode").len(), SALT_LEN);
    }

    #[test]
    fn malformed_salt_is_rejected() {
        let err = decode_salt(&json!({ "salt": "AAAA" })).expect_err("short salt");
        assert!(matches!(err, VaultError::Derivation { .. }));
    }
}
