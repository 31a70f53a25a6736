//! In-memory login sessions.
//!
//! A session carries the principal identity and, in the derived-key mode, the
//! data key derived at login. The key exists nowhere else: closing or expiring
//! the session drops it (and `SymmetricKey` zeroizes on drop). Expiry is
//! enforced on access, so an expired session is unusable immediately without
//! any background task; opening a session also sweeps out every expired one
//! so abandoned keys do not linger.

use base64::{Engine as _, engine::general_purpose};
use dashmap::DashMap;
use rand::{RngCore, rngs::OsRng};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    crypto::SymmetricKey,
    models::{Principal, Role},
};

/// Opaque bearer token identifying a session.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Who is making a request.
#[derive(Debug, Clone)]
pub enum Caller {
    /// No session: single-tenant access.
    Anonymous,
    Principal {
        id: Uuid,
        role: Role,
        session: SessionToken,
    },
}

impl Caller {
    pub fn principal_id(&self) -> Option<Uuid> {
        match self {
            Caller::Anonymous => None,
            Caller::Principal { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Caller::Principal {
                role: Role::Administrator,
                ..
            }
        )
    }

    pub fn session(&self) -> Option<&SessionToken> {
        match self {
            Caller::Anonymous => None,
            Caller::Principal { session, .. } => Some(session),
        }
    }
}

struct Session {
    principal_id: Uuid,
    username: String,
    role: Role,
    derived_key: Option<SymmetricKey>,
    expires_at: Instant,
}

/// Identity view of a live session, without its key.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub principal_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl SessionInfo {
    pub fn into_caller(self, session: SessionToken) -> Caller {
        Caller::Principal {
            id: self.principal_id,
            role: self.role,
            session,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionToken, Session>>,
    ttl: Duration,
}

impl SessionStore {
    /// Sessions idle for longer than `ttl` expire. A zero ttl expires them
    /// immediately.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Start a session. Sessions that expired without being touched again
    /// are dropped here, together with their keys.
    pub fn open(&self, principal: &Principal, derived_key: Option<SymmetricKey>) -> SessionToken {
        let now = Instant::now();
        self.sweep_expired(now);

        let token = SessionToken::generate();
        self.sessions.insert(
            token.clone(),
            Session {
                principal_id: principal.id,
                username: principal.username.clone(),
                role: principal.role,
                derived_key,
                expires_at: now + self.ttl,
            },
        );
        debug!("opened session for principal {}", principal.id);
        token
    }

    /// Look up a live session and extend its idle deadline.
    pub fn get(&self, token: &SessionToken) -> Option<SessionInfo> {
        let now = self.evict_if_expired(token)?;
        let mut entry = self.sessions.get_mut(token)?;
        entry.expires_at = now + self.ttl;
        Some(SessionInfo {
            principal_id: entry.principal_id,
            username: entry.username.clone(),
            role: entry.role,
        })
    }

    /// The derived key held by `token`, provided the session belongs to
    /// `owner`. Any other session, including an administrator's, gets `None`.
    pub fn derived_key(&self, token: &SessionToken, owner: Uuid) -> Option<SymmetricKey> {
        self.evict_if_expired(token)?;
        let entry = self.sessions.get(token)?;
        if entry.principal_id != owner {
            return None;
        }
        entry.derived_key.clone()
    }

    /// Remove a session and its key. Returns whether it existed.
    pub fn close(&self, token: &SessionToken) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Remove every session of a principal (disabled or deleted accounts).
    pub fn close_principal(&self, principal_id: Uuid) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.principal_id != principal_id);
        let closed = before.saturating_sub(self.sessions.len());
        if closed > 0 {
            debug!("closed {closed} session(s) of principal {principal_id}");
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session past its deadline. Returns how many went.
    fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        let swept = before.saturating_sub(self.sessions.len());
        if swept > 0 {
            debug!("swept {swept} expired session(s)");
        }
        swept
    }

    /// Drops the session if it is past its deadline; returns the time used
    /// for the check when the session is still live.
    fn evict_if_expired(&self, token: &SessionToken) -> Option<Instant> {
        let now = Instant::now();
        if self
            .sessions
            .remove_if(token, |_, session| session.expires_at <= now)
            .is_some()
        {
            debug!("session expired");
            return None;
        }
        Some(now)
    }
}
