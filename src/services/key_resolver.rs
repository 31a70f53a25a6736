//! Key resolution: which key (if any) seals or opens an object.

use tracing::debug;
use uuid::Uuid;

use crate::{
    crypto::SymmetricKey,
    errors::{VaultError, VaultResult},
    models::EncryptionMode,
    services::{
        metadata::MetadataRepository,
        sessions::{Caller, SessionStore},
    },
};

/// Outcome of resolving a key for one object.
#[derive(Debug)]
pub enum ResolvedKey {
    /// Seal or open with this key.
    Seal(SymmetricKey),
    /// Bytes pass through untouched.
    Passthrough,
}

#[derive(Clone)]
pub struct KeyResolver {
    fixed: Option<SymmetricKey>,
    metadata: MetadataRepository,
    sessions: SessionStore,
}

impl KeyResolver {
    /// `fixed` is the server-wide key loaded (and validated) at startup.
    pub fn new(
        fixed: Option<SymmetricKey>,
        metadata: MetadataRepository,
        sessions: SessionStore,
    ) -> Self {
        Self {
            fixed,
            metadata,
            sessions,
        }
    }

    /// Resolve the key for an object of `mode` owned by `owner`, on behalf of
    /// `caller`.
    ///
    /// The stored-key mode lets an administrator act for the owner. The
    /// derived-key mode never does: the key only exists in the owner's own
    /// session.
    pub async fn resolve(
        &self,
        mode: EncryptionMode,
        owner: Option<Uuid>,
        caller: &Caller,
    ) -> VaultResult<ResolvedKey> {
        match mode {
            EncryptionMode::Plain | EncryptionMode::ClientOpaque => Ok(ResolvedKey::Passthrough),
            EncryptionMode::Fixed => self
                .fixed
                .clone()
                .map(ResolvedKey::Seal)
                .ok_or(VaultError::KeyUnavailable),
            EncryptionMode::PerPrincipalStored => {
                let owner = owner.ok_or(VaultError::KeyUnavailable)?;
                if caller.principal_id() != Some(owner) && !caller.is_admin() {
                    return Err(VaultError::KeyUnavailable);
                }
                let principal = self
                    .metadata
                    .find_principal(owner)
                    .await?
                    .ok_or(VaultError::KeyUnavailable)?;
                let encoded = principal
                    .stored_key
                    .as_deref()
                    .ok_or(VaultError::KeyUnavailable)?;
                let key = SymmetricKey::from_base64(encoded)?;
                debug!("resolved stored key for principal {owner}");
                Ok(ResolvedKey::Seal(key))
            }
            EncryptionMode::PerPrincipalDerived => {
                let owner = owner.ok_or(VaultError::KeyUnavailable)?;
                let session = caller.session().ok_or(VaultError::KeyUnavailable)?;
                if caller.principal_id() != Some(owner) {
                    return Err(VaultError::KeyUnavailable);
                }
                self.sessions
                    .derived_key(session, owner)
                    .map(ResolvedKey::Seal)
                    .ok_or(VaultError::KeyUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::kdf,
        models::Role,
        services::metadata::NewPrincipal,
    };
    use sqlx::sqlite::SqlitePoolOptions;
    use std::{sync::Arc, time::Duration};

    async fn fixture(fixed: Option<SymmetricKey>) -> (KeyResolver, MetadataRepository, SessionStore) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let metadata = MetadataRepository::new(Arc::new(pool));
        metadata.migrate().await.unwrap();
        let sessions = SessionStore::new(Duration::from_secs(60));
        (
            KeyResolver::new(fixed, metadata.clone(), sessions.clone()),
            metadata,
            sessions,
        )
    }

    async fn add_principal(
        metadata: &MetadataRepository,
        name: &str,
        role: Role,
        stored_key: Option<String>,
    ) -> crate::models::Principal {
        metadata
            .insert_principal(NewPrincipal {
                username: name.into(),
                credential_hash: "hash".into(),
                role,
                stored_key,
                kdf_salt: kdf::new_salt(),
            })
            .await
            .unwrap()
    }

    fn caller_for(sessions: &SessionStore, principal: &crate::models::Principal, key: Option<SymmetricKey>) -> Caller {
        let token = sessions.open(principal, key);
        sessions.get(&token).unwrap().into_caller(token)
    }

    #[tokio::test]
    async fn passthrough_modes_need_no_key() {
        let (resolver, _, _) = fixture(None).await;
        for mode in [EncryptionMode::Plain, EncryptionMode::ClientOpaque] {
            assert!(matches!(
                resolver.resolve(mode, None, &Caller::Anonymous).await.unwrap(),
                ResolvedKey::Passthrough
            ));
        }
    }

    #[tokio::test]
    async fn fixed_mode_uses_configured_key() {
        let key = SymmetricKey::generate();
        let (resolver, _, _) = fixture(Some(key.clone())).await;
        match resolver
            .resolve(EncryptionMode::Fixed, None, &Caller::Anonymous)
            .await
            .unwrap()
        {
            ResolvedKey::Seal(resolved) => assert_eq!(resolved.as_bytes(), key.as_bytes()),
            ResolvedKey::Passthrough => panic!("fixed mode must seal"),
        }

        let (without, _, _) = fixture(None).await;
        assert!(matches!(
            without.resolve(EncryptionMode::Fixed, None, &Caller::Anonymous).await,
            Err(VaultError::KeyUnavailable)
        ));
    }

    #[tokio::test]
    async fn stored_mode_allows_owner_and_admin_only() {
        let (resolver, metadata, sessions) = fixture(None).await;
        let key = SymmetricKey::generate();
        let alice = add_principal(&metadata, "alice", Role::Ordinary, Some(key.to_base64())).await;
        let bob = add_principal(&metadata, "bob", Role::Ordinary, None).await;
        let admin = add_principal(&metadata, "root", Role::Administrator, None).await;

        let mode = EncryptionMode::PerPrincipalStored;
        for caller in [caller_for(&sessions, &alice, None), caller_for(&sessions, &admin, None)] {
            assert!(matches!(
                resolver.resolve(mode, Some(alice.id), &caller).await.unwrap(),
                ResolvedKey::Seal(k) if k.as_bytes() == key.as_bytes()
            ));
        }
        let bob_caller = caller_for(&sessions, &bob, None);
        assert!(matches!(
            resolver.resolve(mode, Some(alice.id), &bob_caller).await,
            Err(VaultError::KeyUnavailable)
        ));
        // bob has no stored key at all
        assert!(matches!(
            resolver.resolve(mode, Some(bob.id), &bob_caller).await,
            Err(VaultError::KeyUnavailable)
        ));
        assert!(matches!(
            resolver.resolve(mode, Some(alice.id), &Caller::Anonymous).await,
            Err(VaultError::KeyUnavailable)
        ));
    }

    #[tokio::test]
    async fn corrupt_stored_key_is_invalid_material() {
        let (resolver, metadata, sessions) = fixture(None).await;
        let alice = add_principal(&metadata, "alice", Role::Ordinary, Some("c2hvcnQ=".into())).await;
        let caller = caller_for(&sessions, &alice, None);
        assert!(matches!(
            resolver
                .resolve(EncryptionMode::PerPrincipalStored, Some(alice.id), &caller)
                .await,
            Err(VaultError::InvalidKeyMaterial { .. })
        ));
    }

    #[tokio::test]
    async fn derived_mode_never_serves_another_principal() {
        let (resolver, metadata, sessions) = fixture(None).await;
        let alice = add_principal(&metadata, "alice", Role::Ordinary, None).await;
        let admin = add_principal(&metadata, "root", Role::Administrator, None).await;
        let key = SymmetricKey::generate();

        let alice_caller = caller_for(&sessions, &alice, Some(key.clone()));
        let admin_caller = caller_for(&sessions, &admin, Some(SymmetricKey::generate()));
        let mode = EncryptionMode::PerPrincipalDerived;

        assert!(matches!(
            resolver.resolve(mode, Some(alice.id), &alice_caller).await.unwrap(),
            ResolvedKey::Seal(k) if k.as_bytes() == key.as_bytes()
        ));
        assert!(matches!(
            resolver.resolve(mode, Some(alice.id), &admin_caller).await,
            Err(VaultError::KeyUnavailable)
        ));

        if let Some(token) = alice_caller.session() {
            sessions.close(token);
        }
        assert!(matches!(
            resolver.resolve(mode, Some(alice.id), &alice_caller).await,
            Err(VaultError::KeyUnavailable)
        ));
    }
}
