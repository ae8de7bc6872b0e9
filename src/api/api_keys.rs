//! API key management endpoints.

use actix_web::{HttpResponse, delete, get, post, web};
use secrecy::ExposeSecret;
use serde::Serialize;
use uuid::Uuid;

use super::session_user;
use crate::auth::permissions::Permission;
use crate::auth::{Authenticated, Requirement};
use crate::error::{AppError, AppResult};
use crate::models::{ApiKeyCreateResponse, ApiKeyListItem, CreateApiKeyRequest};
use crate::services::Services;
use crate::services::api_keys::{NewApiKey, expiry_from_now, parse_scopes};

/// API key list response.
#[derive(Serialize)]
pub struct ApiKeyListResponse {
    pub keys: Vec<ApiKeyListItem>,
}

/// Configure API key routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_key)
        .service(list_keys)
        .service(revoke_key);
}

/// POST /workspaces/{workspace_id}/api-keys
///
/// The full key is only returned in this response.
#[post("/workspaces/{workspace_id}/api-keys")]
pub async fn create_key(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<Uuid>,
    body: web::Json<CreateApiKeyRequest>,
) -> AppResult<HttpResponse> {
    let creator_id = session_user(&auth.identity)?;
    let body = body.into_inner();

    let expires_at = body.expires_in.as_deref().map(expiry_from_now).transpose()?;
    let request = NewApiKey {
        name: body.name,
        description: body.description,
        scopes: parse_scopes(&body.scopes)?,
        expires_at,
    };

    let created = services
        .api_keys
        .create(path.into_inner(), creator_id, request)
        .await?;
    let key = created.key;

    Ok(HttpResponse::Created().json(ApiKeyCreateResponse {
        id: key.id,
        key: created.raw_key.expose_secret().to_string(),
        key_prefix: key.key_prefix,
        name: key.name,
        scopes: key.scopes.iter().map(|s| s.as_str().to_string()).collect(),
        expires_at: key.expires_at.map(|d| d.to_rfc3339()),
        created_at: key.created_at.to_rfc3339(),
    }))
}

/// GET /workspaces/{workspace_id}/api-keys
#[get("/workspaces/{workspace_id}/api-keys")]
pub async fn list_keys(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let workspace_id = path.into_inner();
    services
        .authenticator
        .require(
            &auth.identity,
            workspace_id,
            Requirement::permission(Permission::IntegrationsManage),
        )
        .await?;

    let keys = services.api_keys.list_for_workspace(workspace_id).await?;
    Ok(HttpResponse::Ok().json(ApiKeyListResponse {
        keys: keys.into_iter().map(ApiKeyListItem::from).collect(),
    }))
}

/// DELETE /workspaces/{workspace_id}/api-keys/{key_id}
#[delete("/workspaces/{workspace_id}/api-keys/{key_id}")]
pub async fn revoke_key(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    let (workspace_id, key_id) = path.into_inner();
    let actor_id = session_user(&auth.identity)?;
    services
        .authenticator
        .require(
            &auth.identity,
            workspace_id,
            Requirement::permission(Permission::IntegrationsManage),
        )
        .await?;

    let key = services.api_keys.get(key_id).await?;
    if key.workspace_id != Some(workspace_id) {
        return Err(AppError::NotFound("API key".to_string()));
    }
    let revoked = services.api_keys.revoke(key_id, actor_id).await?;
    Ok(HttpResponse::Ok().json(ApiKeyListItem::from(revoked)))
}
