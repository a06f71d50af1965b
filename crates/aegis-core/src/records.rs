//! Typed application records, one struct per collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known identifier of the per-user settings record.
pub const SETTINGS_ID: &str = "user-settings";

/// A tracked real-estate asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub address: String,
    pub purchase_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_rent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A saved financing or investment simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub property_value: f64,
    pub down_payment: f64,
    /// Annual rate as a fraction (0.1 = 10%).
    pub interest_rate: f64,
    pub term_months: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetadata {
    pub key_created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_rotation_check_at: Option<DateTime<Utc>>,
}

/// Application preferences plus key-age bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub currency: String,
    pub language: String,
    pub theme: String,
    pub notifications: bool,
    pub security_metadata: SecurityMetadata,
}

impl UserSettings {
    pub fn with_key_created_at(key_created_at: DateTime<Utc>) -> Self {
        Self {
            currency: "BRL".to_string(),
            language: "pt-BR".to_string(),
            theme: "system".to_string(),
            notifications: true,
            security_metadata: SecurityMetadata {
                key_created_at,
                last_rotation_check_at: None,
            },
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self::with_key_created_at(Utc::now())
    }
}
