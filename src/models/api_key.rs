//! API Key model for authentication.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::permissions::Scope;
use crate::store::Versioned;

/// API key lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    #[default]
    Active,
    Revoked,
    Expired,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// API Key stored as versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier (UUID)
    pub id: Uuid,
    /// SHA-256 hash of the full key
    pub key_hash: String,
    /// Leading characters of the key for identification
    pub key_prefix: String,
    /// Creator
    pub user_id: Uuid,
    /// Workspace the key acts in; a key without one cannot authenticate
    pub workspace_id: Option<Uuid>,
    /// Human-readable name (e.g., "Ingest - production")
    pub name: String,
    pub description: Option<String>,
    /// Non-empty set of granted scopes
    pub scopes: BTreeSet<Scope>,
    pub status: ApiKeyStatus,
    /// Expiration timestamp (optional)
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_active(&self) -> bool {
        self.status == ApiKeyStatus::Active
    }

    /// Expiry by timestamp, regardless of the stored status.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

impl Versioned for ApiKey {
    const KIND: &'static str = "api_key";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Usage counters, kept apart from [`ApiKey`] so that a usage write can never
/// shadow a concurrent status change. Shares the id of its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub id: Uuid,
    pub last_used_at: Option<DateTime<Utc>>,
    pub use_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl ApiKeyUsage {
    pub fn empty(key_id: Uuid) -> Self {
        Self {
            id: key_id,
            last_used_at: None,
            use_count: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Versioned for ApiKeyUsage {
    const KIND: &'static str = "api_key_usage";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Response when creating a new API key (includes the full key).
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyCreateResponse {
    pub id: Uuid,
    pub key: String, // Full key - only shown once
    pub key_prefix: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

/// Response for listing API keys (key masked).
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyListItem {
    pub id: Uuid,
    pub key_prefix: String,
    pub name: String,
    pub description: Option<String>,
    pub scopes: Vec<String>,
    pub status: String,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub revoked_at: Option<String>,
}

impl From<ApiKey> for ApiKeyListItem {
    fn from(key: ApiKey) -> Self {
        // Keys past expiry read as expired even before the lazy transition ran.
        let status = if key.is_active() && key.is_expired(Utc::now()) {
            ApiKeyStatus::Expired
        } else {
            key.status
        };
        Self {
            id: key.id,
            key_prefix: key.key_prefix,
            name: key.name,
            description: key.description,
            scopes: key.scopes.iter().map(|s| s.as_str().to_string()).collect(),
            status: status.as_str().to_string(),
            expires_at: key.expires_at.map(|d| d.to_rfc3339()),
            created_at: key.created_at.to_rfc3339(),
            revoked_at: key.revoked_at.map(|d| d.to_rfc3339()),
        }
    }
}

/// Request to create a new API key.
#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scopes: Vec<String>,
    /// Expiration duration (e.g., "365d", "30d", "1y")
    #[serde(default)]
    pub expires_in: Option<String>,
}
