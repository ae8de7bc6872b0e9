//! Outgoing mail collaborator.
//!
//! Delivery itself happens elsewhere; this crate only produces the payload.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;

/// Mail template identifiers.
pub mod templates {
    pub const PASSWORD_RESET: &str = "password_reset";
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        workspace_id: Option<Uuid>,
        email: &str,
        template: &'static str,
        template_data: serde_json::Value,
    ) -> AppResult<()>;
}

/// Logs that a mail was queued. Template data is not logged; it carries tokens.
#[derive(Debug, Default, Clone)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(
        &self,
        workspace_id: Option<Uuid>,
        email: &str,
        template: &'static str,
        _template_data: serde_json::Value,
    ) -> AppResult<()> {
        tracing::info!(?workspace_id, email, template, "Mail queued");
        Ok(())
    }
}
