//! Core contracts for Aegis: error taxonomy, collection and envelope types,
//! typed application records, and the persistence contract that concrete
//! backends implement. No cryptography lives here.

pub mod error;
pub mod model;
pub mod records;
pub mod storage;

pub use error::{Result, VaultError};
pub use model::{AuthStatus, Collection, Entry, SecurityEvent, SecurityEventType, StoredEnvelope};
