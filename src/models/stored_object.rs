//! Metadata row for one stored object.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::EncryptionMode;

/// A single object known to the vault.
///
/// Only metadata lives here; the bytes are in the object store under
/// `physical_name`.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    pub id: Uuid,

    /// Display name supplied by the uploader, already sanitised.
    pub logical_name: String,

    /// Server-generated file name inside the object store. Never exposed.
    #[serde(skip_serializing)]
    pub physical_name: String,

    pub content_type: Option<String>,

    /// Plaintext byte count, whatever the on-disk size.
    pub declared_size: i64,

    /// Absent for single-tenant uploads.
    pub owner_id: Option<Uuid>,

    pub encryption_mode: EncryptionMode,

    pub created_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn is_owned_by(&self, principal: Uuid) -> bool {
        self.owner_id == Some(principal)
    }
}
