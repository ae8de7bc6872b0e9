//! API key service: creation, lookup, revocation and authentication.
//!
//! Keys look like `<prefix>_<64 hex>`. Only the SHA-256 of the full key is stored,
//! plus its first characters for display. Usage counters are a separate versioned
//! record so the fire-and-forget usage write never competes with status changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::auth::credentials::{generate_prefixed_token, hash_token, is_random_part};
use crate::auth::permissions::{Permission, Scope, has_permission, scope_requires_permission};
use crate::cache::TtlCache;
use crate::config::AuthSettings;
use crate::error::{AppError, AppResult};
use crate::models::{ApiKey, ApiKeyStatus, ApiKeyUsage};
use crate::services::audit::{AuditEvent, AuditLog, actions};
use crate::services::memberships::{MembershipManager, reasons as membership_reasons};
use crate::store::{RowFilter, Versions};

/// Length of the key prefix stored for identification.
pub const KEY_DISPLAY_PREFIX_LENGTH: usize = 12;

/// Stable `Unauthenticated` reasons, in the order they are checked.
pub mod reasons {
    pub const MALFORMED_KEY: &str = "malformed api key";
    pub const KEY_NOT_FOUND: &str = "api key not found";
    pub const KEY_NOT_ACTIVE: &str = "api key is not active";
    pub const KEY_EXPIRED: &str = "api key expired";
    pub const KEY_WITHOUT_WORKSPACE: &str = "api key is not bound to a workspace";
}

/// Input for [`ApiKeyManager::create`].
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub name: String,
    pub description: Option<String>,
    pub scopes: BTreeSet<Scope>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A new key plus the raw key material, returned exactly once.
#[derive(Debug)]
pub struct CreatedApiKey {
    pub raw_key: SecretString,
    pub key: ApiKey,
}

/// Identity resolved from a valid API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedKey {
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub key_prefix: String,
    pub scopes: BTreeSet<Scope>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Parse a lifetime like "30d", "2w", "6m" (30-day months) or "1y" (365 days).
/// A bare number counts days. Returns `None` for anything unparsable or out of range.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    let (amount, days_per_unit) = match s.char_indices().last()? {
        (i, 'd') => (&s[..i], 1),
        (i, 'w') => (&s[..i], 7),
        (i, 'm') => (&s[..i], 30),
        (i, 'y') => (&s[..i], 365),
        _ => (s.as_str(), 1),
    };
    let days = amount.parse::<i64>().ok()?.checked_mul(days_per_unit)?;
    Duration::try_days(days)
}

/// Expiry timestamp `expires_in` from now, rejecting values that overflow.
pub fn expiry_from_now(expires_in: &str) -> AppResult<DateTime<Utc>> {
    parse_duration(expires_in)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid expires_in '{expires_in}'")))
}

/// Parse scope names, rejecting unknown ones.
pub fn parse_scopes<I, S>(names: I) -> AppResult<BTreeSet<Scope>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| {
            let name = name.as_ref();
            Scope::parse(name).ok_or_else(|| AppError::InvalidInput(format!("Unknown scope '{name}'")))
        })
        .collect()
}

pub struct ApiKeyManager {
    versions: Versions,
    memberships: Arc<MembershipManager>,
    cache: TtlCache<String, AuthenticatedKey>,
    prefix: String,
    audit: AuditLog,
}

impl ApiKeyManager {
    pub fn new(
        versions: Versions,
        memberships: Arc<MembershipManager>,
        settings: &AuthSettings,
        audit: AuditLog,
    ) -> Self {
        Self {
            versions,
            memberships,
            cache: TtlCache::new(settings.session_cache_ttl),
            prefix: settings.api_key_prefix.clone(),
            audit,
        }
    }

    /// Wire prefix of raw keys, e.g. `ak`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `raw` carries the API key prefix. Says nothing about validity.
    pub fn is_api_key(&self, raw: &str) -> bool {
        raw.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('_'))
    }

    /// Create a key bound to `workspace_id`.
    ///
    /// The creator needs `integrations.manage` plus the permission behind every
    /// requested scope. Nothing is written when any check fails.
    pub async fn create(
        &self,
        workspace_id: Uuid,
        creator_id: Uuid,
        request: NewApiKey,
    ) -> AppResult<CreatedApiKey> {
        if request.name.trim().is_empty() {
            return Err(AppError::InvalidInput("name must not be empty".to_string()));
        }
        if request.scopes.is_empty() {
            return Err(AppError::InvalidInput(
                "at least one scope is required".to_string(),
            ));
        }
        let now = Utc::now();
        if request.expires_at.is_some_and(|at| at <= now) {
            return Err(AppError::InvalidInput(
                "expires_at must be in the future".to_string(),
            ));
        }

        let creator = self
            .memberships
            .membership_of(workspace_id, creator_id)
            .await?
            .ok_or(AppError::Forbidden(membership_reasons::NOT_A_MEMBER))?;
        if !has_permission(creator.role, Permission::IntegrationsManage) {
            return Err(AppError::Forbidden(
                Permission::IntegrationsManage.denial_reason(),
            ));
        }
        for scope in &request.scopes {
            if let Some(required) = scope_requires_permission(*scope) {
                if !has_permission(creator.role, required) {
                    return Err(AppError::Forbidden(required.denial_reason()));
                }
            }
        }

        let token = generate_prefixed_token(&self.prefix);
        let key_prefix = token
            .raw
            .expose_secret()
            .chars()
            .take(KEY_DISPLAY_PREFIX_LENGTH)
            .collect::<String>();

        let key = self
            .versions
            .put(ApiKey {
                id: Uuid::new_v4(),
                key_hash: token.hash,
                key_prefix,
                user_id: creator_id,
                workspace_id: Some(workspace_id),
                name: request.name.trim().to_string(),
                description: request.description,
                scopes: request.scopes,
                status: ApiKeyStatus::Active,
                expires_at: request.expires_at,
                revoked_by: None,
                revoked_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(key_id = %key.id, key_prefix = %key.key_prefix, %workspace_id, "API key created");
        self.audit
            .record(
                AuditEvent::new(actions::API_KEY_CREATED, "api_key")
                    .actor(creator_id)
                    .workspace(workspace_id)
                    .target(key.id)
                    .metadata(serde_json::json!({ "scopes": key.scopes, "name": key.name })),
            )
            .await;

        Ok(CreatedApiKey {
            raw_key: token.raw,
            key,
        })
    }

    /// Look a key up by its raw value.
    pub async fn find_by_token(&self, raw_key: &str) -> AppResult<Option<ApiKey>> {
        let keys: Vec<ApiKey> = self
            .versions
            .resolve_latest_many(RowFilter::new().eq("key_hash", hash_token(raw_key)))
            .await?;
        Ok(keys.into_iter().next_back())
    }

    pub async fn get(&self, id: Uuid) -> AppResult<ApiKey> {
        self.versions
            .resolve_latest(id)
            .await?
            .ok_or_else(|| AppError::NotFound("API key".to_string()))
    }

    /// Keys of a workspace, newest first.
    pub async fn list_for_workspace(&self, workspace_id: Uuid) -> AppResult<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .versions
            .resolve_latest_many(RowFilter::new().eq("workspace_id", workspace_id))
            .await?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    /// Revoke a key. Revoking again re-stamps `revoked_by` and `revoked_at`.
    pub async fn revoke(&self, id: Uuid, revoked_by: Uuid) -> AppResult<ApiKey> {
        let key = self.get(id).await?;
        let revoked = self
            .versions
            .put(ApiKey {
                status: ApiKeyStatus::Revoked,
                revoked_by: Some(revoked_by),
                revoked_at: Some(Utc::now()),
                ..key
            })
            .await?;
        // Invalidate only after the write returned.
        self.cache.invalidate(&revoked.key_hash);

        tracing::info!(key_id = %id, key_prefix = %revoked.key_prefix, %revoked_by, "API key revoked");
        let mut event = AuditEvent::new(actions::API_KEY_REVOKED, "api_key")
            .actor(revoked_by)
            .target(id);
        if let Some(workspace_id) = revoked.workspace_id {
            event = event.workspace(workspace_id);
        }
        self.audit.record(event).await;
        Ok(revoked)
    }

    /// Move an active key past its expiry to `expired`. Returns the current key.
    pub async fn update_expired_status(&self, id: Uuid) -> AppResult<ApiKey> {
        let key = self.get(id).await?;
        self.expire_if_due(key).await
    }

    async fn expire_if_due(&self, key: ApiKey) -> AppResult<ApiKey> {
        if !key.is_active() || !key.is_expired(Utc::now()) {
            return Ok(key);
        }
        let expired = self
            .versions
            .put(ApiKey {
                status: ApiKeyStatus::Expired,
                ..key
            })
            .await?;
        self.cache.invalidate(&expired.key_hash);

        tracing::info!(key_id = %expired.id, key_prefix = %expired.key_prefix, "API key expired");
        let mut event = AuditEvent::new(actions::API_KEY_EXPIRED, "api_key").target(expired.id);
        if let Some(workspace_id) = expired.workspace_id {
            event = event.workspace(workspace_id);
        }
        self.audit.record(event).await;
        Ok(expired)
    }

    /// Expire a key immediately, whatever its expiry date.
    pub async fn expire_now(&self, id: Uuid) -> AppResult<ApiKey> {
        let key = self.get(id).await?;
        if !key.is_active() {
            return Ok(key);
        }
        self.expire_if_due(ApiKey {
            expires_at: Some(Utc::now()),
            ..key
        })
        .await
    }

    /// Current usage counters of a key.
    pub async fn usage(&self, id: Uuid) -> AppResult<ApiKeyUsage> {
        Ok(self
            .versions
            .resolve_latest(id)
            .await?
            .unwrap_or_else(|| ApiKeyUsage::empty(id)))
    }

    /// Record a use of the key in the background. Failures are only logged.
    ///
    /// Concurrent uses may overwrite each other's increments; the count is approximate.
    pub fn update_last_used(&self, id: Uuid) -> tokio::task::JoinHandle<()> {
        let versions = self.versions.clone();
        tokio::spawn(async move {
            let result = async {
                let mut usage = versions
                    .resolve_latest::<ApiKeyUsage>(id)
                    .await?
                    .unwrap_or_else(|| ApiKeyUsage::empty(id));
                usage.last_used_at = Some(Utc::now());
                usage.use_count += 1;
                versions.put(usage).await
            }
            .await;
            if let Err(err) = result {
                tracing::debug!(key_id = %id, error = %err, "Failed to record API key usage");
            }
        })
    }

    /// Resolve a raw bearer key to its identity.
    ///
    /// Checks, in order: prefix and shape, existence, status, expiry, workspace.
    pub async fn authenticate(&self, raw_key: &str) -> AppResult<AuthenticatedKey> {
        let well_formed = raw_key
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(is_random_part);
        if !well_formed {
            return Err(AppError::Unauthenticated(reasons::MALFORMED_KEY));
        }

        let key_hash = hash_token(raw_key);
        let now = Utc::now();
        if let Some(cached) = self.cache.get(&key_hash) {
            if cached.expires_at.is_none_or(|at| at > now) {
                self.update_last_used(cached.key_id);
                return Ok(cached);
            }
            self.cache.invalidate(&key_hash);
        }

        let ticket = self.cache.ticket();
        let key = self
            .find_by_token(raw_key)
            .await?
            .ok_or(AppError::Unauthenticated(reasons::KEY_NOT_FOUND))?;
        if !key.is_active() {
            return Err(AppError::Unauthenticated(reasons::KEY_NOT_ACTIVE));
        }
        if key.is_expired(now) {
            let key_id = key.id;
            if let Err(err) = self.expire_if_due(key).await {
                tracing::warn!(%key_id, error = %err, "Failed to mark API key expired");
            }
            return Err(AppError::Unauthenticated(reasons::KEY_EXPIRED));
        }
        let workspace_id = key
            .workspace_id
            .ok_or(AppError::Unauthenticated(reasons::KEY_WITHOUT_WORKSPACE))?;

        let identity = AuthenticatedKey {
            key_id: key.id,
            user_id: key.user_id,
            workspace_id,
            key_prefix: key.key_prefix,
            scopes: key.scopes,
            expires_at: key.expires_at,
        };
        if !self.cache.insert(key_hash, identity.clone(), ticket) {
            tracing::debug!(key_id = %identity.key_id, "API key changed during authentication, not cached");
        }
        self.update_last_used(identity.key_id);
        Ok(identity)
    }
}
