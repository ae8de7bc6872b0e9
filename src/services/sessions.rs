//! Session lifecycle: create, validate, revoke.
//!
//! A raw session token is `<session_id>.<user_id>.<random>`; only its SHA-256 is
//! stored. Positive validation results are cached for a short TTL keyed by
//! `(session_id, user_id)`. Revocation writes first and invalidates the cache
//! second; a validation whose store read started before the invalidation never
//! repopulates the cache, so a revoked session stops validating as soon as
//! `revoke` returns.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use uuid::Uuid;

use crate::auth::credentials::{is_random_part, random_hex, seal_token, verify_token_hash};
use crate::cache::{Ticket, TtlCache};
use crate::config::AuthSettings;
use crate::error::{AppError, AppResult};
use crate::models::{Session, SessionMetadata};
use crate::services::audit::{AuditEvent, AuditLog, actions};
use crate::store::{RowFilter, Versions};

/// Stable `Unauthenticated` reasons.
pub mod reasons {
    pub const MALFORMED_TOKEN: &str = "malformed session token";
    pub const SESSION_NOT_FOUND: &str = "session not found";
    pub const SESSION_REVOKED: &str = "session revoked";
    pub const SESSION_EXPIRED: &str = "session expired";
}

/// Identity resolved from a valid session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A new session plus its raw token, which is never stored.
#[derive(Debug)]
pub struct CreatedSession {
    pub session: Session,
    pub token: SecretString,
}

#[derive(Debug, Clone)]
struct CachedSession {
    token_hash: String,
    expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    versions: Versions,
    cache: TtlCache<(Uuid, Uuid), CachedSession>,
    session_ttl: Duration,
    audit: AuditLog,
}

fn parse_token(raw: &str) -> Option<(Uuid, Uuid)> {
    let mut parts = raw.splitn(3, '.');
    let session_id = Uuid::parse_str(parts.next()?).ok()?;
    let user_id = Uuid::parse_str(parts.next()?).ok()?;
    let random = parts.next()?;
    is_random_part(random).then_some((session_id, user_id))
}

impl SessionManager {
    pub fn new(versions: Versions, settings: &AuthSettings, audit: AuditLog) -> Self {
        Self {
            versions,
            cache: TtlCache::new(settings.session_cache_ttl),
            session_ttl: settings.session_ttl,
            audit,
        }
    }

    /// Create a session for `user_id`. The returned token is the only copy.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> AppResult<CreatedSession> {
        let ttl = TimeDelta::from_std(self.session_ttl)
            .map_err(|e| AppError::Internal(format!("Invalid session TTL: {e}")))?;
        let session_id = Uuid::new_v4();
        let token = seal_token(format!("{}.{}.{}", session_id, user_id, random_hex()));

        let now = Utc::now();
        let session = self
            .versions
            .put(Session {
                id: session_id,
                user_id,
                token_hash: token.hash,
                expires_at: now + ttl,
                revoked_at: None,
                metadata: metadata.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(%session_id, %user_id, "Session created");
        self.audit
            .record(
                AuditEvent::new(actions::SESSION_CREATED, "session")
                    .actor(user_id)
                    .target(session_id)
                    .client(&metadata),
            )
            .await;

        Ok(CreatedSession {
            session,
            token: token.raw,
        })
    }

    /// True iff the session resolves, belongs to `user_id`, is not revoked and not expired.
    pub async fn validate(&self, session_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let now = Utc::now();
        if let Some(cached) = self.cache.get(&(session_id, user_id)) {
            if cached.expires_at > now {
                return Ok(true);
            }
        }

        let ticket = self.cache.ticket();
        match self.resolve(session_id, user_id).await? {
            Some(session) if session.is_active(now) => {
                self.remember(&session, ticket);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Resolve a raw bearer token to its session.
    pub async fn authenticate(&self, raw_token: &str) -> AppResult<AuthenticatedSession> {
        let (session_id, user_id) = parse_token(raw_token)
            .ok_or(AppError::Unauthenticated(reasons::MALFORMED_TOKEN))?;
        let now = Utc::now();

        if let Some(cached) = self.cache.get(&(session_id, user_id)) {
            if cached.expires_at > now && verify_token_hash(raw_token, &cached.token_hash) {
                return Ok(AuthenticatedSession {
                    session_id,
                    user_id,
                    expires_at: cached.expires_at,
                });
            }
        }

        let ticket = self.cache.ticket();
        let session = self
            .resolve(session_id, user_id)
            .await?
            .filter(|s| verify_token_hash(raw_token, &s.token_hash))
            .ok_or(AppError::Unauthenticated(reasons::SESSION_NOT_FOUND))?;

        if session.is_revoked() {
            return Err(AppError::Unauthenticated(reasons::SESSION_REVOKED));
        }
        if session.is_expired(now) {
            return Err(AppError::Unauthenticated(reasons::SESSION_EXPIRED));
        }

        self.remember(&session, ticket);
        Ok(AuthenticatedSession {
            session_id,
            user_id,
            expires_at: session.expires_at,
        })
    }

    /// Mark one session revoked. Revoking an already revoked session is a no-op.
    pub async fn revoke(&self, session_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let session = self
            .resolve(session_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session".to_string()))?;

        if !session.is_revoked() {
            self.versions
                .put(Session {
                    revoked_at: Some(Utc::now()),
                    ..session
                })
                .await?;
        }
        // Invalidate only after the write returned.
        self.cache.invalidate(&(session_id, user_id));

        tracing::info!(%session_id, %user_id, "Session revoked");
        self.audit
            .record(
                AuditEvent::new(actions::SESSION_REVOKED, "session")
                    .actor(user_id)
                    .target(session_id),
            )
            .await;
        Ok(())
    }

    /// Revoke every active session of `user_id` and return how many were revoked.
    ///
    /// Not atomic: a session created while this runs may survive.
    pub async fn revoke_all(&self, user_id: Uuid) -> AppResult<usize> {
        let now = Utc::now();
        let active: Vec<Session> = self
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_revoked())
            .collect();

        let mut revoked = 0;
        let mut result = Ok(());
        for session in active {
            let write = self
                .versions
                .put(Session {
                    revoked_at: Some(now),
                    ..session
                })
                .await;
            if let Err(err) = write {
                result = Err(err);
                break;
            }
            revoked += 1;
        }
        // Drop cached entries even when a write failed part way.
        self.cache
            .invalidate_where(|(_, cached_user), _| *cached_user != user_id);
        result?;

        tracing::info!(%user_id, revoked, "All sessions revoked");
        self.audit
            .record(
                AuditEvent::new(actions::SESSIONS_REVOKED_ALL, "user")
                    .actor(user_id)
                    .target(user_id)
                    .metadata(serde_json::json!({ "revoked": revoked })),
            )
            .await;
        Ok(revoked)
    }

    /// Sessions of `user_id` that are neither revoked nor expired, newest first.
    pub async fn list_active(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active(now))
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        self.versions
            .resolve_latest_many(RowFilter::new().eq("user_id", user_id))
            .await
    }

    async fn resolve(&self, session_id: Uuid, user_id: Uuid) -> AppResult<Option<Session>> {
        let session: Option<Session> = self.versions.resolve_latest(session_id).await?;
        Ok(session.filter(|s| s.user_id == user_id))
    }

    fn remember(&self, session: &Session, ticket: Ticket) {
        let cached = self.cache.insert(
            (session.id, session.user_id),
            CachedSession {
                token_hash: session.token_hash.clone(),
                expires_at: session.expires_at,
            },
            ticket,
        );
        if !cached {
            tracing::debug!(session_id = %session.id, "Session changed during validation, not cached");
        }
    }
}
