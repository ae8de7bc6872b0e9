//! API endpoint modules.

pub mod api_keys;
pub mod auth;
pub mod health;
pub mod workspaces;

use actix_web::web;
use uuid::Uuid;

use crate::auth::{Identity, reasons};
use crate::error::{AppError, AppResult};

pub use api_keys::configure_routes as configure_api_key_routes;
pub use auth::configure_routes as configure_auth_routes;
pub use health::configure_health_routes;
pub use workspaces::configure_routes as configure_workspace_routes;

/// User behind a session identity; API keys cannot act as a user.
pub(crate) fn session_user(identity: &Identity) -> AppResult<Uuid> {
    match identity {
        Identity::Session { user_id, .. } => Ok(*user_id),
        Identity::ApiKey { .. } => Err(AppError::Forbidden(reasons::NOT_AVAILABLE_TO_API_KEYS)),
    }
}

/// Register every `/api/v1` route.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health_routes)
            .configure(configure_auth_routes)
            .configure(configure_workspace_routes)
            .configure(configure_api_key_routes),
    );
}
