//! Registered principals (users) of a multi-tenant vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum Role {
    Ordinary,
    Administrator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Ordinary => "ordinary",
            Role::Administrator => "administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ordinary" | "user" => Ok(Role::Ordinary),
            "administrator" | "admin" => Ok(Role::Administrator),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// A principal row.
///
/// `credential_hash`, `stored_key` and `kdf_salt` never leave the server:
/// they are skipped when serialising and redacted in `Debug`.
#[derive(Serialize, Clone, FromRow)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,

    /// Argon2id PHC string.
    #[serde(skip_serializing)]
    pub credential_hash: String,

    pub role: Role,
    pub enabled: bool,

    /// Base64 data key, only populated in the per-principal stored-key mode.
    #[serde(skip_serializing)]
    pub stored_key: Option<String>,

    /// Base64 salt for the derived-key mode and client-side derivation.
    #[serde(skip_serializing)]
    pub kdf_salt: String,

    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("credential_hash", &"[REDACTED]")
            .field("role", &self.role)
            .field("enabled", &self.enabled)
            .field("stored_key", &self.stored_key.as_ref().map(|_| "[REDACTED]"))
            .field("kdf_salt", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("last_login", &self.last_login)
            .finish()
    }
}
