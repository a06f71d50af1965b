use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named partition of encrypted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Properties,
    Simulations,
    Settings,
    SecurityAudit,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Properties,
        Collection::Simulations,
        Collection::Settings,
        Collection::SecurityAudit,
    ];

    /// Collections sealed under the user's key (everything except the audit log).
    pub const USER_DATA: [Collection; 3] = [
        Collection::Properties,
        Collection::Simulations,
        Collection::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Properties => "properties",
            Collection::Simulations => "simulations",
            Collection::Settings => "settings",
            Collection::SecurityAudit => "security_audit",
        }
    }

    pub fn is_user_data(&self) -> bool {
        !matches!(self, Collection::SecurityAudit)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown collection: {s}"))
    }
}

/// Persisted unit of a collection. Field names match the on-disk envelope
/// `{ id, data, timestamp, integrityHash }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    pub id: String,
    /// base64(nonce || ciphertext-with-tag)
    pub data: String,
    /// Epoch milliseconds of the last write.
    pub timestamp: i64,
    #[serde(rename = "integrityHash")]
    pub integrity_hash: String,
}

/// Plaintext shape of every stored record: the record plus its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<T> {
    pub id: String,
    pub record: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    DataWrite,
    DataAccess,
    DataDeletion,
    LoginSuccess,
    LoginFailed,
    AccountLocked,
    DataIntegrityViolation,
    DecryptionFailure,
    KeyRotation,
    DataImport,
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: serde_json::Value) -> Self {
        Self::at(event_type, details, Utc::now())
    }

    pub fn at(
        event_type: SecurityEventType,
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp,
            details,
        }
    }
}

/// Answer to "may the user try to authenticate right now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub locked: bool,
    pub unlock_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(collection.as_str().parse::<Collection>(), Ok(collection));
        }
        assert!("users".parse::<Collection>().is_err());
    }

    #[test]
    fn envelope_uses_wire_field_names() {
        let envelope = StoredEnvelope {
            id: "a".into(),
            data: "b".into(),
            timestamp: 1,
            integrity_hash: "c".into(),
        };
        let json = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(json["integrityHash"], "c");
        assert!(json.get("integrity_hash").is_none());
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let event = SecurityEvent::new(
            SecurityEventType::DataIntegrityViolation,
            serde_json::json!({}),
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "data_integrity_violation");
    }
}
