//! Business logic services.

pub mod api_keys;
pub mod audit;
pub mod mail;
pub mod memberships;
pub mod sessions;
pub mod users;

use std::sync::Arc;

pub use api_keys::ApiKeyManager;
pub use audit::{AuditEvent, AuditLog, AuditSink, TracingAuditSink};
pub use mail::{LogMailSender, MailSender};
pub use memberships::MembershipManager;
pub use sessions::SessionManager;
pub use users::UserManager;

use crate::auth::Authenticator;
use crate::config::AuthSettings;
use crate::store::{VersionedStore, Versions};

/// All managers wired over one store.
#[derive(Clone)]
pub struct Services {
    pub versions: Versions,
    pub sessions: Arc<SessionManager>,
    pub memberships: Arc<MembershipManager>,
    pub api_keys: Arc<ApiKeyManager>,
    pub users: Arc<UserManager>,
    pub authenticator: Arc<Authenticator>,
    pub mail: Arc<dyn MailSender>,
}

impl Services {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        settings: &AuthSettings,
        audit: AuditLog,
        mail: Arc<dyn MailSender>,
    ) -> Self {
        let versions = Versions::new(store, settings.store_timeout);
        let sessions = Arc::new(SessionManager::new(
            versions.clone(),
            settings,
            audit.clone(),
        ));
        let memberships = Arc::new(MembershipManager::new(
            versions.clone(),
            Arc::clone(&sessions),
            audit.clone(),
        ));
        let api_keys = Arc::new(ApiKeyManager::new(
            versions.clone(),
            Arc::clone(&memberships),
            settings,
            audit.clone(),
        ));
        let users = Arc::new(UserManager::new(
            versions.clone(),
            Arc::clone(&sessions),
            settings,
            audit,
        ));
        let authenticator = Arc::new(Authenticator::new(
            Arc::clone(&sessions),
            Arc::clone(&api_keys),
            Arc::clone(&memberships),
        ));

        Self {
            versions,
            sessions,
            memberships,
            api_keys,
            users,
            authenticator,
            mail,
        }
    }

    /// Defaults: audit events to tracing, mail only logged.
    pub fn with_defaults(store: Arc<dyn VersionedStore>, settings: &AuthSettings) -> Self {
        Self::new(
            store,
            settings,
            AuditLog::tracing(),
            Arc::new(LogMailSender),
        )
    }
}
