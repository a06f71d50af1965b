//! SHA-256 digests over canonical JSON, stored next to each ciphertext as a
//! tamper check independent of the AEAD tag.

use aegis_core::{Result, VaultError};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the canonical serialization of `value`.
pub fn digest<T: Serialize>(value: &T) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn verify<T: Serialize>(value: &T, expected: &str) -> Result<bool> {
    let actual = digest(value)?;
    Ok(constant_time_eq(actual.as_bytes(), expected.as_bytes()))
}

/// JSON with object keys sorted at every level, so the same record always
/// hashes the same regardless of field order.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(VaultError::encoding)?;
    serde_json::to_vec(&canonicalize(value)).map_err(VaultError::encoding)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
