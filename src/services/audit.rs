//! Audit trail for state-changing operations.
//!
//! Recording is fire-and-forget from the caller's point of view: a failing sink
//! is logged and never undoes or fails the operation that produced the event.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::SessionMetadata;

/// One audited action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub actor: Option<Uuid>,
    pub workspace: Option<Uuid>,
    pub action: &'static str,
    pub target_type: &'static str,
    pub target_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEvent {
    pub fn new(action: &'static str, target_type: &'static str) -> Self {
        Self {
            actor: None,
            workspace: None,
            action,
            target_type,
            target_id: None,
            metadata: serde_json::Value::Null,
            ip: None,
            user_agent: None,
        }
    }

    pub fn actor(mut self, actor: Uuid) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn workspace(mut self, workspace: Uuid) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn client(mut self, client: &SessionMetadata) -> Self {
        self.ip = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }
}

/// Audit action names.
pub mod actions {
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_REVOKED: &str = "session.revoked";
    pub const SESSIONS_REVOKED_ALL: &str = "session.revoked_all";
    pub const USER_REGISTERED: &str = "user.registered";
    pub const USER_PROVISIONED: &str = "user.provisioned";
    pub const USER_LOCKED: &str = "user.locked";
    pub const USER_DELETED: &str = "user.deleted";
    pub const PASSWORD_CHANGED: &str = "user.password_changed";
    pub const PASSWORD_RESET_REQUESTED: &str = "user.password_reset_requested";
    pub const PASSWORD_RESET: &str = "user.password_reset";
    pub const API_KEY_CREATED: &str = "api_key.created";
    pub const API_KEY_REVOKED: &str = "api_key.revoked";
    pub const API_KEY_EXPIRED: &str = "api_key.expired";
    pub const WORKSPACE_CREATED: &str = "workspace.created";
    pub const MEMBER_ADDED: &str = "member.added";
    pub const MEMBER_ROLE_UPDATED: &str = "member.role_updated";
    pub const MEMBER_REMOVED: &str = "member.removed";
    pub const MEMBER_LEFT: &str = "member.left";
    pub const OWNERSHIP_TRANSFERRED: &str = "workspace.ownership_transferred";
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, event: AuditEvent) -> AppResult<()>;
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(&self, event: AuditEvent) -> AppResult<()> {
        tracing::info!(
            target: "audit",
            action = event.action,
            target_type = event.target_type,
            actor = ?event.actor,
            workspace = ?event.workspace,
            target_id = ?event.target_id,
            ip = ?event.ip,
            user_agent = ?event.user_agent,
            metadata = %event.metadata,
            "audit"
        );
        Ok(())
    }
}

/// Handle used by the managers to record events.
#[derive(Clone)]
pub struct AuditLog {
    sink: std::sync::Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: std::sync::Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn tracing() -> Self {
        Self::new(std::sync::Arc::new(TracingAuditSink))
    }

    /// Record `event`; failures are logged and swallowed.
    pub async fn record(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(err) = self.sink.log(event).await {
            tracing::warn!(action, error = %err, "Failed to record audit event");
        }
    }
}
