//! Refresh-token sessions: the server-side records that authorise minting
//! short-lived access tokens.
//!
//! The service is stateless; all state lives behind the [`SessionStore`]
//! port, so it is safe to share across tasks.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fingerprint of the device that opened the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A refresh session. Valid while `expires_at` is in the future and
/// `revoked_at` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSession {
    pub id: String,
    pub user_id: String,
    /// Opaque URL-safe token; unique per session.
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device: DeviceInfo,
}

/// Why a refresh token failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidateError {
    #[error("refresh session not found")]
    NotFound,
    #[error("refresh session expired")]
    Expired,
    #[error("refresh session revoked")]
    Revoked,
}

impl From<ValidateError> for Error {
    /// All three collapse to UNAUTHORIZED at the boundary so a probe cannot
    /// distinguish a revoked session from a nonexistent one.
    fn from(err: ValidateError) -> Self {
        Error::unauthorized("invalid refresh token").with_source(err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: RefreshSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<RefreshSession>>;
    async fn get_by_token(&self, refresh_token: &str) -> Result<Option<RefreshSession>>;
    async fn update(&self, session: RefreshSession) -> Result<()>;
    /// Delete sessions that expired before `now`, or were revoked more than
    /// `grace` before `now`. Returns the number removed.
    async fn purge(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64>;
    async fn count(&self) -> Result<u64>;
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: parking_lot::RwLock<HashMap<String, RefreshSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: RefreshSession) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(Error::conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<RefreshSession>> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn get_by_token(&self, refresh_token: &str) -> Result<Option<RefreshSession>> {
        Ok(self
            .sessions
            .read()
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned())
    }

    async fn update(&self, session: RefreshSession) -> Result<()> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(&session.id) {
            return Err(Error::not_found("refresh session"));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn purge(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| {
            let expired = s.expires_at < now;
            let long_revoked = s.revoked_at.is_some_and(|at| at + grace < now);
            !(expired || long_revoked)
        });
        Ok((before - sessions.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.sessions.read().len() as u64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionServiceConfig {
    /// Refresh-session lifetime.
    pub refresh_ttl: Duration,
    /// Byte length of generated refresh tokens.
    pub token_bytes: usize,
    /// How long revoked sessions stay visible before cleanup removes them.
    pub revoked_grace: Duration,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            token_bytes: 32,
            revoked_grace: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct SessionService {
    store: std::sync::Arc<dyn SessionStore>,
    config: SessionServiceConfig,
}

impl SessionService {
    pub fn new(store: std::sync::Arc<dyn SessionStore>, config: SessionServiceConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Create a session and return `(refresh_token, session)`.
    pub async fn create(&self, user_id: &str, device: DeviceInfo) -> Result<(String, RefreshSession)> {
        if user_id.trim().is_empty() {
            return Err(Error::validation("user id must not be empty"));
        }
        let now = Utc::now();
        let token = hg_crypto::random_token(self.config.token_bytes);
        let session = RefreshSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            refresh_token: token.clone(),
            issued_at: now,
            expires_at: now
                + chrono::Duration::from_std(self.config.refresh_ttl)
                    .unwrap_or(chrono::Duration::zero()),
            last_used_at: now,
            revoked_at: None,
            device,
        };
        self.store.insert(session.clone()).await?;
        tracing::debug!(session_id = %session.id, user_id = %user_id, "refresh session created");
        Ok((token, session))
    }

    /// Validate a refresh token. On success the session's `last_used_at`
    /// is advanced and the session returned.
    pub async fn validate(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<RefreshSession, ValidateError> {
        let mut session = self
            .store
            .get_by_token(refresh_token)
            .await
            .map_err(|_| ValidateError::NotFound)?
            .ok_or(ValidateError::NotFound)?;

        if session.revoked_at.is_some() {
            return Err(ValidateError::Revoked);
        }
        let now = Utc::now();
        if session.expires_at <= now {
            return Err(ValidateError::Expired);
        }

        session.last_used_at = now;
        self.store
            .update(session.clone())
            .await
            .map_err(|_| ValidateError::NotFound)?;
        Ok(session)
    }

    /// Revoke by session ID. Later validations fail with `Revoked`.
    pub async fn revoke(&self, id: &str) -> Result<()> {
        let mut session = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("refresh session"))?;
        if session.revoked_at.is_none() {
            session.revoked_at = Some(Utc::now());
            self.store.update(session).await?;
            tracing::info!(session_id = %id, "refresh session revoked");
        }
        Ok(())
    }

    /// Remove expired sessions and revoked sessions past the grace window.
    /// Returns the number removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.store
            .purge(Utc::now(), self.config.revoked_grace)
            .await
    }
}
