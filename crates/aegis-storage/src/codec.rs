//! Authenticated encryption of structured records (AES-256-GCM).
//!
//! Blob layout: `base64(nonce (12 bytes) || ciphertext || tag (16 bytes))`.
//! The plaintext is `{ "data": <record>, "timestamp": <epoch-ms> }` so every
//! blob carries its sealing time.

use aegis_core::{Result, VaultError};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::key_provider::KeyHandle;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Format/version tag bound to every blob as associated data.
pub const ASSOCIATED_DATA: &[u8] = b"AEG-RECORD:v1";

#[derive(Serialize)]
struct SealedRef<'a, T> {
    data: &'a T,
    timestamp: i64,
}

#[derive(Deserialize)]
struct Sealed<T> {
    data: T,
    timestamp: i64,
}

/// A decrypted record together with the time it was sealed.
#[derive(Debug, Clone, PartialEq)]
pub struct Opened<T> {
    pub data: T,
    pub sealed_at: DateTime<Utc>,
}

pub fn encrypt<T: Serialize>(record: &T, key: &KeyHandle) -> Result<String> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(&SealedRef {
            data: record,
            timestamp: Utc::now().timestamp_millis(),
        })
        .map_err(VaultError::encoding)?,
    );
    let sealed = seal_bytes(&plaintext, key)?;
    Ok(STANDARD.encode(sealed))
}

pub fn decrypt<T: DeserializeOwned>(blob: &str, key: &KeyHandle) -> Result<T> {
    open(blob, key).map(|opened| opened.data)
}

pub fn open<T: DeserializeOwned>(blob: &str, key: &KeyHandle) -> Result<Opened<T>> {
    let bytes = STANDARD
        .decode(blob)
        .map_err(|_| VaultError::decryption("blob is not valid base64"))?;
    let plaintext = open_bytes(&bytes, key)?;
    let sealed: Sealed<T> = serde_json::from_slice(&plaintext).map_err(VaultError::encoding)?;
    let sealed_at = Utc
        .timestamp_millis_opt(sealed.timestamp)
        .single()
        .ok_or_else(|| VaultError::encoding("sealing timestamp out of range"))?;
    Ok(Opened {
        data: sealed.data,
        sealed_at,
    })
}

/// `nonce || ciphertext-with-tag` under a fresh random nonce.
pub fn seal_bytes(plaintext: &[u8], key: &KeyHandle) -> Result<Vec<u8>> {
    let cipher = build_cipher(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map_err(|e| VaultError::Storage {
            reason: format!("encrypt failed: {e}"),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal_bytes`]. Length is checked before any cipher work.
pub fn open_bytes(data: &[u8], key: &KeyHandle) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::decryption("blob too short"));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);

    build_cipher(key)
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| VaultError::decryption("authentication failed"))
}

fn build_cipher(key: &KeyHandle) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.expose()))
}
