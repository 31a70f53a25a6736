//! Registration, login and principal administration.
//!
//! This is the only place a cleartext password is seen. It is wrapped in
//! `SecretString` at the boundary, used to verify the credential and (in the
//! derived-key mode) to derive the session key, then dropped.

use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    crypto::{
        SALT_LEN, SymmetricKey,
        kdf::{self, KdfSettings},
    },
    errors::{VaultError, VaultResult},
    models::{EncryptionMode, Principal, Role},
    services::{
        metadata::{MetadataRepository, NewPrincipal, is_unique_violation},
        sessions::{Caller, SessionStore, SessionToken},
        vault::VaultService,
    },
};

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 50;
const DEFAULT_ADMIN_USERNAME: &str = "admin";

pub struct LoginOutcome {
    pub token: SessionToken,
    pub principal: Principal,
}

/// Public KDF parameters for client-side key derivation.
#[derive(Debug, Clone, Serialize)]
pub struct SaltInfo {
    pub salt: String,
    pub iterations: u32,
    pub algorithm: &'static str,
}

#[derive(Clone)]
pub struct PrincipalService {
    metadata: MetadataRepository,
    sessions: SessionStore,
    mode: EncryptionMode,
    kdf: KdfSettings,
}

impl PrincipalService {
    pub fn new(
        metadata: MetadataRepository,
        sessions: SessionStore,
        mode: EncryptionMode,
        kdf: KdfSettings,
    ) -> Self {
        Self {
            metadata,
            sessions,
            mode,
            kdf,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Usernames are 3 to 50 characters of ASCII letters, digits, `_` or `-`.
    fn validate_username(username: &str) -> VaultResult<()> {
        let len = username.chars().count();
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
            return Err(VaultError::InvalidName(format!(
                "username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
            )));
        }
        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(VaultError::InvalidName(
                "username may only contain letters, digits, '_' and '-'".into(),
            ));
        }
        Ok(())
    }

    /// Create a principal. Every principal gets a KDF salt; only the
    /// stored-key mode also gets a persisted data key.
    pub async fn register(
        &self,
        username: &str,
        password: SecretString,
        role: Role,
    ) -> VaultResult<Principal> {
        let username = username.trim();
        Self::validate_username(username)?;
        if password.expose_secret().is_empty() {
            return Err(VaultError::InvalidCredentials);
        }

        let settings = self.kdf.clone();
        let credential_hash =
            tokio::task::spawn_blocking(move || kdf::hash_credential(&password, &settings))
                .await
                .map_err(|e| VaultError::Kdf(e.to_string()))??;

        let stored_key = (self.mode == EncryptionMode::PerPrincipalStored)
            .then(|| SymmetricKey::generate().to_base64());

        let principal = self
            .metadata
            .insert_principal(NewPrincipal {
                username: username.to_string(),
                credential_hash,
                role,
                stored_key,
                kdf_salt: kdf::new_salt(),
            })
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    VaultError::Conflict(format!("username `{username}` is taken"))
                } else {
                    VaultError::Database(err)
                }
            })?;

        info!("registered principal {} ({})", principal.username, principal.id);
        Ok(principal)
    }

    /// Verify the credential and open a session.
    ///
    /// In the derived-key mode the data key is derived here and handed to the
    /// session; it is never written anywhere else.
    pub async fn login(&self, username: &str, password: SecretString) -> VaultResult<LoginOutcome> {
        let principal = self
            .metadata
            .find_principal_by_username(username.trim())
            .await?
            .ok_or(VaultError::InvalidCredentials)?;

        let mode = self.mode;
        let iterations = self.kdf.pbkdf2_iterations;
        let hash = principal.credential_hash.clone();
        let salt = principal.kdf_salt.clone();
        let (verified, derived_key) = tokio::task::spawn_blocking(move || {
            if !kdf::verify_credential(&password, &hash) {
                return Ok((false, None));
            }
            if mode == EncryptionMode::PerPrincipalDerived {
                kdf::derive_key(&password, &salt, iterations).map(|key| (true, Some(key)))
            } else {
                Ok((true, None))
            }
        })
        .await
        .map_err(|e| VaultError::Kdf(e.to_string()))??;

        if !verified {
            warn!("failed login for {}", principal.username);
            return Err(VaultError::InvalidCredentials);
        }
        if !principal.enabled {
            warn!("login refused for disabled principal {}", principal.username);
            return Err(VaultError::AccessDenied);
        }

        let mut principal = principal;
        if mode == EncryptionMode::PerPrincipalStored && principal.stored_key.is_none() {
            let key = SymmetricKey::generate().to_base64();
            self.metadata.set_stored_key(principal.id, &key).await?;
            principal.stored_key = Some(key);
            info!("generated missing stored key for {}", principal.username);
        }

        let now = Utc::now();
        self.metadata.touch_last_login(principal.id, now).await?;
        principal.last_login = Some(now);

        let token = self.sessions.open(&principal, derived_key);
        info!("principal {} logged in", principal.username);
        Ok(LoginOutcome { token, principal })
    }

    /// Close the session and drop its key. Returns whether it existed.
    pub fn logout(&self, token: &SessionToken) -> bool {
        let closed = self.sessions.close(token);
        if closed {
            info!("session closed");
        }
        closed
    }

    /// Salt and iteration count for client-side derivation.
    ///
    /// Unknown usernames get a stable pseudo-salt computed from the name, so
    /// the response does not reveal whether the account exists.
    pub async fn salt_for(&self, username: &str) -> VaultResult<SaltInfo> {
        let salt = match self.metadata.find_principal_by_username(username).await? {
            Some(principal) => principal.kdf_salt,
            None => {
                let digest = Sha256::new()
                    .chain_update(b"object-vault:unknown-principal:")
                    .chain_update(username.as_bytes())
                    .finalize();
                general_purpose::STANDARD.encode(&digest[..SALT_LEN])
            }
        };
        Ok(SaltInfo {
            salt,
            iterations: self.kdf.pbkdf2_iterations,
            algorithm: "PBKDF2-HMAC-SHA256",
        })
    }

    pub async fn list(&self) -> VaultResult<Vec<Principal>> {
        Ok(self.metadata.list_principals().await?)
    }

    pub async fn get(&self, id: Uuid) -> VaultResult<Principal> {
        self.metadata
            .find_principal(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("principal {id}")))
    }

    /// Flip the enabled flag. Disabling also ends every session.
    pub async fn toggle_enabled(&self, actor: &Caller, id: Uuid) -> VaultResult<Principal> {
        Self::guard_admin_target(actor, id)?;
        let mut principal = self.get(id).await?;
        principal.enabled = !principal.enabled;
        self.metadata.set_enabled(id, principal.enabled).await?;
        if !principal.enabled {
            self.sessions.close_principal(id);
        }
        info!(
            "principal {} {}",
            principal.username,
            if principal.enabled { "enabled" } else { "disabled" }
        );
        Ok(principal)
    }

    pub async fn set_role(&self, actor: &Caller, id: Uuid, role: Role) -> VaultResult<Principal> {
        Self::guard_admin_target(actor, id)?;
        let mut principal = self.get(id).await?;
        self.metadata.set_role(id, role).await?;
        principal.role = role;
        // Live sessions carry the old role.
        self.sessions.close_principal(id);
        info!("principal {} is now {}", principal.username, role);
        Ok(principal)
    }

    /// Delete a principal and everything they own.
    pub async fn delete(&self, actor: &Caller, id: Uuid, vault: &VaultService) -> VaultResult<()> {
        Self::guard_admin_target(actor, id)?;
        let principal = self.get(id).await?;
        vault.purge_principal(id).await?;
        self.sessions.close_principal(id);
        self.metadata.delete_principal(id).await?;
        info!("deleted principal {} ({})", principal.username, id);
        Ok(())
    }

    /// Create `admin` when no administrator exists and a password is set.
    pub async fn ensure_default_admin(
        &self,
        password: Option<SecretString>,
    ) -> VaultResult<Option<Principal>> {
        if self.metadata.count_admins().await? > 0 {
            return Ok(None);
        }
        let Some(password) = password else {
            warn!("no administrator exists and no admin password is configured");
            return Ok(None);
        };
        let admin = self
            .register(DEFAULT_ADMIN_USERNAME, password, Role::Administrator)
            .await?;
        info!("created default administrator `{}`", admin.username);
        Ok(Some(admin))
    }

    /// Administrators act on others, never on themselves.
    fn guard_admin_target(actor: &Caller, target: Uuid) -> VaultResult<()> {
        if !actor.is_admin() {
            return Err(VaultError::AccessDenied);
        }
        if actor.principal_id() == Some(target) {
            return Err(VaultError::Conflict(
                "administrators cannot modify their own account".into(),
            ));
        }
        Ok(())
    }
}
