//! Core data models for the vault.
//!
//! These map to the SQLite tables via `sqlx::FromRow` and serialize as JSON
//! via `serde`; secret columns are never serialized.

pub mod encryption_mode;
pub mod principal;
pub mod stats;
pub mod stored_object;

pub use encryption_mode::EncryptionMode;
pub use principal::{Principal, Role};
pub use stats::{VaultStats, format_size};
pub use stored_object::StoredObject;
