//! Request authentication and authorization.
//!
//! A bearer token starting with the API key prefix goes to the API key manager,
//! anything else to the session manager. The resolved [`Identity`] is then checked
//! against a [`Requirement`]: sessions through the caller's current workspace
//! role, API keys through their scopes.

pub mod credentials;
mod extractor;
pub mod permissions;

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::BEARER_SCHEME;
use crate::error::{AppError, AppResult};
use crate::services::{ApiKeyManager, MembershipManager, SessionManager};
use permissions::{Permission, Scope, has_permission};

pub use extractor::{Authenticated, client_metadata};

/// Stable reasons produced while resolving or authorizing a caller.
pub mod reasons {
    pub const MISSING_CREDENTIAL: &str = "missing bearer credential";
    pub const WRONG_WORKSPACE: &str = "api key is bound to another workspace";
    pub const NOT_AVAILABLE_TO_API_KEYS: &str = "operation not available to api keys";
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Session {
        session_id: Uuid,
        user_id: Uuid,
    },
    ApiKey {
        key_id: Uuid,
        /// Creator of the key
        user_id: Uuid,
        workspace_id: Uuid,
        key_prefix: String,
        scopes: BTreeSet<Scope>,
    },
}

impl Identity {
    /// User behind the credential (the creator, for API keys).
    pub fn user_id(&self) -> Uuid {
        match self {
            Identity::Session { user_id, .. } | Identity::ApiKey { user_id, .. } => *user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Identity::Session { .. } => "session",
            Identity::ApiKey { .. } => "api_key",
        }
    }
}

/// What an operation needs. Sessions are checked against `permission`; API keys
/// against `scope`, and operations without a scope are closed to API keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub permission: Permission,
    pub scope: Option<Scope>,
}

impl Requirement {
    /// Session-only requirement.
    pub const fn permission(permission: Permission) -> Self {
        Self {
            permission,
            scope: None,
        }
    }

    /// Requirement that API keys can satisfy with `scope`.
    pub const fn with_scope(permission: Permission, scope: Scope) -> Self {
        Self {
            permission,
            scope: Some(scope),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Extract the token from an `Authorization` header value.
pub fn parse_bearer(header: &str) -> AppResult<&str> {
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AppError::Unauthenticated(reasons::MISSING_CREDENTIAL))?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) || token.is_empty() {
        return Err(AppError::Unauthenticated(reasons::MISSING_CREDENTIAL));
    }
    Ok(token)
}

pub struct Authenticator {
    sessions: Arc<SessionManager>,
    api_keys: Arc<ApiKeyManager>,
    memberships: Arc<MembershipManager>,
}

impl Authenticator {
    pub fn new(
        sessions: Arc<SessionManager>,
        api_keys: Arc<ApiKeyManager>,
        memberships: Arc<MembershipManager>,
    ) -> Self {
        Self {
            sessions,
            api_keys,
            memberships,
        }
    }

    /// Whether `token` would be routed to the API key manager.
    pub fn is_api_key(&self, token: &str) -> bool {
        self.api_keys.is_api_key(token)
    }

    /// Resolve a raw bearer token to an identity.
    pub async fn resolve(&self, token: &str) -> AppResult<Identity> {
        if self.api_keys.is_api_key(token) {
            let key = self.api_keys.authenticate(token).await?;
            Ok(Identity::ApiKey {
                key_id: key.key_id,
                user_id: key.user_id,
                workspace_id: key.workspace_id,
                key_prefix: key.key_prefix,
                scopes: key.scopes,
            })
        } else {
            let session = self.sessions.authenticate(token).await?;
            Ok(Identity::Session {
                session_id: session.session_id,
                user_id: session.user_id,
            })
        }
    }

    /// Decide whether `identity` may act in `workspace_id` under `requirement`.
    ///
    /// Session decisions read the membership fresh on every call.
    pub async fn authorize(
        &self,
        identity: &Identity,
        workspace_id: Uuid,
        requirement: Requirement,
    ) -> AppResult<Decision> {
        match identity {
            Identity::Session { user_id, .. } => {
                let Some(member) = self.memberships.membership_of(workspace_id, *user_id).await?
                else {
                    return Ok(Decision::Deny(
                        crate::services::memberships::reasons::NOT_A_MEMBER,
                    ));
                };
                if has_permission(member.role, requirement.permission) {
                    Ok(Decision::Allow)
                } else {
                    Ok(Decision::Deny(requirement.permission.denial_reason()))
                }
            }
            Identity::ApiKey {
                workspace_id: key_workspace,
                scopes,
                ..
            } => {
                if *key_workspace != workspace_id {
                    return Ok(Decision::Deny(reasons::WRONG_WORKSPACE));
                }
                match requirement.scope {
                    None => Ok(Decision::Deny(reasons::NOT_AVAILABLE_TO_API_KEYS)),
                    Some(scope) if scopes.contains(&scope) => Ok(Decision::Allow),
                    Some(scope) => Ok(Decision::Deny(scope.denial_reason())),
                }
            }
        }
    }

    /// [`Self::authorize`], with a denial turned into `Forbidden`.
    pub async fn require(
        &self,
        identity: &Identity,
        workspace_id: Uuid,
        requirement: Requirement,
    ) -> AppResult<()> {
        match self.authorize(identity, workspace_id, requirement).await? {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::debug!(kind = identity.kind(), %workspace_id, reason, "Request denied");
                Err(AppError::Forbidden(reason))
            }
        }
    }
}
