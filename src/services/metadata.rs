//! SQLite persistence for object and principal rows.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{EncryptionMode, Principal, Role, StoredObject};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str = "id, logical_name, physical_name, content_type, declared_size, \
     owner_id, encryption_mode, created_at";

const PRINCIPAL_COLUMNS: &str = "id, username, credential_hash, role, enabled, stored_key, \
     kdf_salt, created_at, last_login";

/// Which objects a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Owner(Uuid),
    /// Single-tenant objects with no owner.
    Unowned,
    All,
}

/// Fields of a new object row; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub logical_name: String,
    pub physical_name: String,
    pub content_type: Option<String>,
    pub declared_size: i64,
    pub owner_id: Option<Uuid>,
    pub encryption_mode: EncryptionMode,
}

#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub credential_hash: String,
    pub role: Role,
    pub stored_key: Option<String>,
    pub kdf_salt: String,
}

#[derive(Clone)]
pub struct MetadataRepository {
    db: Arc<SqlitePool>,
}

impl MetadataRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<bool, sqlx::Error> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(one == 1)
    }

    // --- objects ---

    pub async fn insert_object(&self, new: NewObject) -> Result<StoredObject, sqlx::Error> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "INSERT INTO stored_objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {OBJECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.logical_name)
        .bind(new.physical_name)
        .bind(new.content_type)
        .bind(new.declared_size)
        .bind(new.owner_id)
        .bind(new.encryption_mode)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    pub async fn find_object(&self, id: Uuid) -> Result<Option<StoredObject>, sqlx::Error> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM stored_objects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Objects in `scope`, newest first.
    pub async fn list_objects(&self, scope: Scope) -> Result<Vec<StoredObject>, sqlx::Error> {
        let base = format!("SELECT {OBJECT_COLUMNS} FROM stored_objects");
        let order = "ORDER BY created_at DESC";
        match scope {
            Scope::Owner(owner) => {
                sqlx::query_as::<_, StoredObject>(&format!("{base} WHERE owner_id = ? {order}"))
                    .bind(owner)
                    .fetch_all(&*self.db)
                    .await
            }
            Scope::Unowned => {
                sqlx::query_as::<_, StoredObject>(&format!(
                    "{base} WHERE owner_id IS NULL {order}"
                ))
                .fetch_all(&*self.db)
                .await
            }
            Scope::All => {
                sqlx::query_as::<_, StoredObject>(&format!("{base} {order}"))
                    .fetch_all(&*self.db)
                    .await
            }
        }
    }

    /// Returns whether a row was removed.
    pub async fn delete_object(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM stored_objects WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `(count, sum of declared sizes)` in `scope`.
    pub async fn object_stats(&self, scope: Scope) -> Result<(i64, i64), sqlx::Error> {
        let base = "SELECT COUNT(*), COALESCE(SUM(declared_size), 0) FROM stored_objects";
        match scope {
            Scope::Owner(owner) => {
                sqlx::query_as::<_, (i64, i64)>(&format!("{base} WHERE owner_id = ?"))
                    .bind(owner)
                    .fetch_one(&*self.db)
                    .await
            }
            Scope::Unowned => {
                sqlx::query_as::<_, (i64, i64)>(&format!("{base} WHERE owner_id IS NULL"))
                    .fetch_one(&*self.db)
                    .await
            }
            Scope::All => {
                sqlx::query_as::<_, (i64, i64)>(base)
                    .fetch_one(&*self.db)
                    .await
            }
        }
    }

    // --- principals ---

    pub async fn insert_principal(&self, new: NewPrincipal) -> Result<Principal, sqlx::Error> {
        sqlx::query_as::<_, Principal>(&format!(
            "INSERT INTO principals ({PRINCIPAL_COLUMNS}) VALUES (?, ?, ?, ?, 1, ?, ?, ?, NULL) \
             RETURNING {PRINCIPAL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.username)
        .bind(new.credential_hash)
        .bind(new.role)
        .bind(new.stored_key)
        .bind(new.kdf_salt)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    pub async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, sqlx::Error> {
        sqlx::query_as::<_, Principal>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, sqlx::Error> {
        sqlx::query_as::<_, Principal>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_principals(&self) -> Result<Vec<Principal>, sqlx::Error> {
        sqlx::query_as::<_, Principal>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals ORDER BY created_at ASC"
        ))
        .fetch_all(&*self.db)
        .await
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE principals SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_role(&self, id: Uuid, role: Role) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE principals SET role = ? WHERE id = ?")
            .bind(role)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_stored_key(&self, id: Uuid, stored_key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE principals SET stored_key = ? WHERE id = ?")
            .bind(stored_key)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE principals SET last_login = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_principal(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM principals WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_admins(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM principals WHERE role = ?")
            .bind(Role::Administrator)
            .fetch_one(&*self.db)
            .await
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
