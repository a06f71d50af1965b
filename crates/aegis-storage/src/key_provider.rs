use std::{
    fmt,
    sync::{Arc, Mutex},
};

use aegis_core::{Result, VaultError};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// 256-bit AEAD key length.
pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Stretched from identifier + password; re-derivable.
    Password,
    /// Random, for anonymous sessions; gone when dropped.
    Ephemeral,
    /// Per-installation key sealing the audit log.
    Device,
}

/// Opaque symmetric key. The bytes never leave this crate and are wiped on drop.
pub struct KeyHandle {
    id: String,
    origin: KeyOrigin,
    secret: Zeroizing<[u8; KEY_LEN]>,
}

impl KeyHandle {
    pub(crate) fn from_secret(secret: Zeroizing<[u8; KEY_LEN]>, origin: KeyOrigin) -> Self {
        Self {
            id: fingerprint(&secret),
            origin,
            secret,
        }
    }

    /// Deterministic 8-hex-char fingerprint of the key, never the key itself.
    /// Handles over the same key share it; it is persisted in plaintext in
    /// the rotation journal and audit details.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Random key for anonymous/demo sessions. Unrecoverable once dropped.
pub fn generate_ephemeral_key() -> Result<KeyHandle> {
    random_secret().map(|secret| KeyHandle::from_secret(secret, KeyOrigin::Ephemeral))
}

/// Supplies the device audit key (OS keychain in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_or_create(&self) -> Result<KeyHandle>;
}

/// OS keyring-backed provider. Uses the `keyring` crate to store the key.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self) -> Result<KeyHandle> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        let entry = keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)?;
        if let Ok(stored) = entry.get_password() {
            let secret = decode_secret(&stored)?;
            return Ok(KeyHandle::from_secret(secret, KeyOrigin::Device));
        }

        let secret = random_secret()?;
        entry
            .set_password(&encode_secret(&secret))
            .map_err(keyring_err)?;
        Ok(KeyHandle::from_secret(secret, KeyOrigin::Device))
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<Zeroizing<[u8; KEY_LEN]>>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyHandle> {
        let mut guard = self.inner.lock().map_err(|err| VaultError::Derivation {
            reason: format!("lock poisoned: {err}"),
        })?;

        if let Some(existing) = guard.as_ref() {
            return Ok(KeyHandle::from_secret(existing.clone(), KeyOrigin::Device));
        }

        let secret = random_secret()?;
        *guard = Some(secret.clone());
        Ok(KeyHandle::from_secret(secret, KeyOrigin::Device))
    }
}

fn random_secret() -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut secret = Zeroizing::new([0u8; KEY_LEN]);
    OsRng
        .try_fill_bytes(&mut secret[..])
        .map_err(|e| VaultError::Derivation {
            reason: format!("system randomness unavailable: {e}"),
        })?;
    Ok(secret)
}

fn fingerprint(secret: &[u8; KEY_LEN]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"aegis-key-id");
    hasher.update(secret);
    hex::encode(&hasher.finalize()[..4])
}

fn encode_secret(secret: &[u8; KEY_LEN]) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(secret))
}

fn decode_secret(stored: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let bytes = Zeroizing::new(general_purpose::STANDARD.decode(stored).map_err(|e| {
        VaultError::Derivation {
            reason: format!("stored key decode failed: {e}"),
        }
    })?);

    if bytes.len() != KEY_LEN {
        return Err(VaultError::Derivation {
            reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
        });
    }

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn keyring_err(err: keyring::Error) -> VaultError {
    VaultError::Derivation {
        reason: format!("keyring error: {err}"),
    }
}
