//! User accounts: signup, password login with lockout, password changes and resets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use uuid::Uuid;

use crate::auth::credentials::{generate_token, hash_password, hash_token, verify_password};
use crate::config::AuthSettings;
use crate::error::{AppError, AppResult};
use crate::locks::KeyedLocks;
use crate::models::user::{normalize_email, user_id_for_email};
use crate::models::{PasswordReset, SessionMetadata, User, UserStatus};
use crate::services::audit::{AuditEvent, AuditLog, actions};
use crate::services::sessions::{CreatedSession, SessionManager};
use crate::store::{RowFilter, Versions};

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Stable `Unauthenticated` / `Conflict` reasons.
pub mod reasons {
    pub const INVALID_CREDENTIALS: &str = "invalid email or password";
    pub const ACCOUNT_LOCKED: &str = "account temporarily locked";
    pub const ACCOUNT_DISABLED: &str = "account disabled";
    pub const PASSWORD_LOGIN_UNAVAILABLE: &str = "password login is not available for this account";
    pub const INVALID_RESET_TOKEN: &str = "invalid or expired reset token";
    pub const EMAIL_TAKEN: &str = "email already registered";
}

fn to_delta(duration: Duration) -> AppResult<TimeDelta> {
    TimeDelta::from_std(duration).map_err(|e| AppError::Internal(format!("Invalid duration: {e}")))
}

fn validate_email(email: &str) -> AppResult<String> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::InvalidInput("invalid email address".to_string())),
    }
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

pub struct UserManager {
    versions: Versions,
    sessions: Arc<SessionManager>,
    max_failed_logins: u32,
    lockout_duration: Duration,
    password_reset_ttl: Duration,
    signups: KeyedLocks<String>,
    audit: AuditLog,
}

impl UserManager {
    pub fn new(
        versions: Versions,
        sessions: Arc<SessionManager>,
        settings: &AuthSettings,
        audit: AuditLog,
    ) -> Self {
        Self {
            versions,
            sessions,
            max_failed_logins: settings.max_failed_logins,
            lockout_duration: settings.lockout_duration,
            password_reset_ttl: settings.password_reset_ttl,
            signups: KeyedLocks::default(),
            audit,
        }
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<User> {
        self.versions
            .resolve_latest(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    /// The account registered under `email`. User ids derive from the normalized
    /// email, so this is a point read.
    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.versions.resolve_latest(user_id_for_email(email)).await
    }

    /// Signups for one email run one at a time in this process. Across
    /// processes, racing signups write versions of the same user id.
    async fn insert_new(&self, email: &str, password_hash: Option<String>) -> AppResult<User> {
        let email = validate_email(email)?;
        let _guard = self.signups.acquire(email.clone()).await;

        if self.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(reasons::EMAIL_TAKEN));
        }
        self.versions.put(User::new(&email, password_hash)).await
    }

    /// Create a password account.
    pub async fn register(&self, email: &str, password: &str) -> AppResult<User> {
        validate_password(password)?;
        let user = self.insert_new(email, Some(hash_password(password)?)).await?;

        tracing::info!(user_id = %user.id, "User registered");
        self.audit
            .record(
                AuditEvent::new(actions::USER_REGISTERED, "user")
                    .actor(user.id)
                    .target(user.id),
            )
            .await;
        Ok(user)
    }

    /// Create an account managed by an external identity provider (no password).
    pub async fn provision_external(&self, email: &str) -> AppResult<User> {
        let user = self.insert_new(email, None).await?;

        tracing::info!(user_id = %user.id, "External user provisioned");
        self.audit
            .record(AuditEvent::new(actions::USER_PROVISIONED, "user").target(user.id))
            .await;
        Ok(user)
    }

    /// Verify a password and open a session.
    ///
    /// Unknown emails and wrong passwords share one reason. Reaching
    /// `max_failed_logins` consecutive failures locks the account.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        metadata: SessionMetadata,
    ) -> AppResult<(User, CreatedSession)> {
        let now = Utc::now();
        let user = self
            .find_by_email(email)
            .await?
            .ok_or(AppError::Unauthenticated(reasons::INVALID_CREDENTIALS))?;

        if user.is_deleted() || user.status != UserStatus::Active {
            return Err(AppError::Unauthenticated(reasons::ACCOUNT_DISABLED));
        }
        if user.is_locked(now) {
            return Err(AppError::Unauthenticated(reasons::ACCOUNT_LOCKED));
        }
        let Some(password_hash) = user.password_hash.as_deref() else {
            return Err(AppError::Unauthenticated(reasons::PASSWORD_LOGIN_UNAVAILABLE));
        };

        if !verify_password(password, password_hash)? {
            self.record_failed_login(user, &metadata).await?;
            return Err(AppError::Unauthenticated(reasons::INVALID_CREDENTIALS));
        }

        let user = self
            .versions
            .put(User {
                failed_login_attempts: 0,
                locked_until: None,
                last_login_at: Some(now),
                ..user
            })
            .await?;
        let session = self.sessions.create_session(user.id, metadata).await?;

        tracing::info!(user_id = %user.id, session_id = %session.session.id, "User logged in");
        Ok((user, session))
    }

    async fn record_failed_login(&self, user: User, metadata: &SessionMetadata) -> AppResult<()> {
        let attempts = user.failed_login_attempts + 1;
        if attempts < self.max_failed_logins {
            self.versions
                .put(User {
                    failed_login_attempts: attempts,
                    ..user
                })
                .await?;
            tracing::debug!(attempts, "Failed login");
            return Ok(());
        }

        let locked_until = Utc::now() + to_delta(self.lockout_duration)?;
        let user = self
            .versions
            .put(User {
                failed_login_attempts: 0,
                locked_until: Some(locked_until),
                ..user
            })
            .await?;

        tracing::warn!(user_id = %user.id, %locked_until, "Account locked after failed logins");
        self.audit
            .record(
                AuditEvent::new(actions::USER_LOCKED, "user")
                    .target(user.id)
                    .client(metadata)
                    .metadata(serde_json::json!({ "locked_until": locked_until })),
            )
            .await;
        Ok(())
    }

    /// Change the password after verifying the current one. Revokes every session.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let user = self.get(user_id).await?;
        let Some(password_hash) = user.password_hash.as_deref() else {
            return Err(AppError::Unauthenticated(reasons::PASSWORD_LOGIN_UNAVAILABLE));
        };
        if !verify_password(current_password, password_hash)? {
            return Err(AppError::Unauthenticated(reasons::INVALID_CREDENTIALS));
        }
        validate_password(new_password)?;

        self.versions
            .put(User {
                password_hash: Some(hash_password(new_password)?),
                ..user
            })
            .await?;
        self.sessions.revoke_all(user_id).await?;

        tracing::info!(%user_id, "Password changed");
        self.audit
            .record(
                AuditEvent::new(actions::PASSWORD_CHANGED, "user")
                    .actor(user_id)
                    .target(user_id),
            )
            .await;
        Ok(())
    }

    /// Issue a one-time reset token for the mail collaborator to deliver.
    ///
    /// Returns `None` for unknown or deleted accounts so callers answer alike.
    pub async fn request_password_reset(
        &self,
        email: &str,
    ) -> AppResult<Option<(User, SecretString)>> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };
        if user.is_deleted() {
            return Ok(None);
        }

        let token = generate_token();
        let now = Utc::now();
        let reset = self
            .versions
            .put(PasswordReset {
                id: Uuid::new_v4(),
                user_id: user.id,
                token_hash: token.hash,
                expires_at: now + to_delta(self.password_reset_ttl)?,
                used_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(user_id = %user.id, reset_id = %reset.id, "Password reset requested");
        self.audit
            .record(AuditEvent::new(actions::PASSWORD_RESET_REQUESTED, "user").target(user.id))
            .await;
        Ok(Some((user, token.raw)))
    }

    /// Set a new password using a reset token. The token is consumed first.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        validate_password(new_password)?;
        let now = Utc::now();
        let resets: Vec<PasswordReset> = self
            .versions
            .resolve_latest_many(RowFilter::new().eq("token_hash", hash_token(token)))
            .await?;
        let reset = resets
            .into_iter()
            .find(|r| r.is_usable(now))
            .ok_or(AppError::Unauthenticated(reasons::INVALID_RESET_TOKEN))?;
        let user = self.get(reset.user_id).await?;
        if user.is_deleted() {
            return Err(AppError::Unauthenticated(reasons::INVALID_RESET_TOKEN));
        }

        self.versions
            .put(PasswordReset {
                used_at: Some(now),
                ..reset
            })
            .await?;
        let user = self
            .versions
            .put(User {
                password_hash: Some(hash_password(new_password)?),
                failed_login_attempts: 0,
                locked_until: None,
                ..user
            })
            .await?;
        self.sessions.revoke_all(user.id).await?;

        tracing::info!(user_id = %user.id, "Password reset");
        self.audit
            .record(AuditEvent::new(actions::PASSWORD_RESET, "user").target(user.id))
            .await;
        Ok(())
    }

    /// Mark the account deleted and revoke its sessions. Rows are kept.
    pub async fn soft_delete(&self, user_id: Uuid, actor_id: Uuid) -> AppResult<User> {
        let user = self.get(user_id).await?;
        if user.is_deleted() {
            return Ok(user);
        }
        let user = self
            .versions
            .put(User {
                status: UserStatus::Deleted,
                deleted_at: Some(Utc::now()),
                ..user
            })
            .await?;
        self.sessions.revoke_all(user_id).await?;

        tracing::info!(%user_id, %actor_id, "User soft-deleted");
        self.audit
            .record(
                AuditEvent::new(actions::USER_DELETED, "user")
                    .actor(actor_id)
                    .target(user_id),
            )
            .await;
        Ok(user)
    }
}
