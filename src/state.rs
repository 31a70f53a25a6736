//! Application state shared across handlers.

use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    config::AppConfig,
    errors::VaultResult,
    services::{
        key_resolver::KeyResolver,
        metadata::MetadataRepository,
        object_store::ObjectStore,
        principals::PrincipalService,
        sessions::SessionStore,
        vault::VaultService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub vault: VaultService,
    pub principals: PrincipalService,
    pub sessions: SessionStore,
    pub metadata: MetadataRepository,
}

impl AppState {
    /// Wire the services together.
    ///
    /// Fails with `InvalidKeyMaterial` when the configured server key is
    /// missing (fixed mode) or malformed, before anything is served.
    pub fn from_config(cfg: &AppConfig, db: Arc<SqlitePool>) -> VaultResult<Self> {
        let fixed_key = cfg.fixed_key()?;
        if fixed_key.is_some() {
            info!("server key loaded");
        }

        let metadata = MetadataRepository::new(db);
        let sessions = SessionStore::new(Duration::from_secs(cfg.session_ttl_secs));
        let keys = KeyResolver::new(fixed_key, metadata.clone(), sessions.clone());
        let store = ObjectStore::new(&cfg.upload_dir);
        let vault = VaultService::new(
            store,
            metadata.clone(),
            keys,
            cfg.encryption_mode,
            cfg.max_upload_bytes,
        );
        let principals = PrincipalService::new(
            metadata.clone(),
            sessions.clone(),
            cfg.encryption_mode,
            cfg.kdf.clone(),
        );

        Ok(Self {
            vault,
            principals,
            sessions,
            metadata,
        })
    }
}
