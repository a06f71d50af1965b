//! Cryptography and persistence for Aegis.
//! AES-256-GCM envelopes, PBKDF2-derived or random keys, SHA-256 integrity
//! digests, and a file-backed implementation of the backend contract.

pub mod codec;
pub mod envelope;
pub mod file_store;
pub mod integrity;
pub mod kdf;
pub mod key_provider;

pub use file_store::FileBackend;
pub use kdf::KdfParams;
pub use key_provider::{generate_ephemeral_key, KeyHandle, KeyOrigin, KeyProvider};
