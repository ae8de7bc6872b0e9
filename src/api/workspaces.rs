//! Workspace and membership endpoints.

use actix_web::{HttpResponse, delete, get, post, put, web};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session_user;
use crate::auth::permissions::{Permission, Scope};
use crate::auth::{Authenticated, Decision, Requirement};
use crate::error::AppResult;
use crate::models::{
    AddMemberRequest, MemberResponse, TransferOwnershipRequest, UpdateRoleRequest,
    WorkspaceCreatedResponse,
};
use crate::services::Services;

/// Members list response.
#[derive(Serialize)]
pub struct MemberListResponse {
    pub members: Vec<MemberResponse>,
}

/// Body of an authorization check.
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub permission: Permission,
    #[serde(default)]
    pub scope: Option<Scope>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Serialize)]
struct TransferResponse {
    previous_owner: MemberResponse,
    new_owner: MemberResponse,
}

/// Configure workspace routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_workspace)
        .service(authorize)
        .service(list_members)
        .service(add_member)
        .service(get_member)
        .service(update_member_role)
        .service(remove_member)
        .service(leave_workspace)
        .service(transfer_ownership);
}

/// POST /workspaces - create a workspace owned by the caller
#[post("/workspaces")]
pub async fn create_workspace(
    services: web::Data<Services>,
    auth: Authenticated,
) -> AppResult<HttpResponse> {
    let user_id = session_user(&auth.identity)?;
    let owner = services.memberships.create_workspace(user_id, &auth.client).await?;
    Ok(HttpResponse::Created().json(WorkspaceCreatedResponse {
        workspace_id: owner.workspace_id,
        owner: owner.into(),
    }))
}

/// POST /workspaces/{workspace_id}/authorize
///
/// Evaluates a requirement for the caller without performing anything.
#[post("/workspaces/{workspace_id}/authorize")]
pub async fn authorize(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<Uuid>,
    body: web::Json<AuthorizeRequest>,
) -> AppResult<HttpResponse> {
    let requirement = Requirement {
        permission: body.permission,
        scope: body.scope,
    };
    let decision = services
        .authenticator
        .authorize(&auth.identity, path.into_inner(), requirement)
        .await?;
    let response = match decision {
        Decision::Allow => AuthorizeResponse {
            allowed: true,
            reason: None,
        },
        Decision::Deny(reason) => AuthorizeResponse {
            allowed: false,
            reason: Some(reason.to_string()),
        },
    };
    Ok(HttpResponse::Ok().json(response))
}

/// GET /workspaces/{workspace_id}/members
#[get("/workspaces/{workspace_id}/members")]
pub async fn list_members(
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
            Requirement::permission(Permission::MembersView),
        )
        .await?;

    let members = services.memberships.list(workspace_id).await?;
    Ok(HttpResponse::Ok().json(MemberListResponse {
        members: members.into_iter().map(MemberResponse::from).collect(),
    }))
}

/// POST /workspaces/{workspace_id}/members
#[post("/workspaces/{workspace_id}/members")]
pub async fn add_member(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<Uuid>,
    body: web::Json<AddMemberRequest>,
) -> AppResult<HttpResponse> {
    let actor_id = session_user(&auth.identity)?;
    let member = services
        .memberships
        .add_member(path.into_inner(), body.user_id, body.role, actor_id, &auth.client)
        .await?;
    Ok(HttpResponse::Created().json(MemberResponse::from(member)))
}

/// GET /workspaces/{workspace_id}/members/{user_id}
#[get("/workspaces/{workspace_id}/members/{user_id}")]
pub async fn get_member(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    let (workspace_id, user_id) = path.into_inner();
    services
        .authenticator
        .require(
            &auth.identity,
            workspace_id,
            Requirement::permission(Permission::MembersView),
        )
        .await?;

    let member = services.memberships.get(workspace_id, user_id).await?;
    Ok(HttpResponse::Ok().json(MemberResponse::from(member)))
}

/// PUT /workspaces/{workspace_id}/members/{user_id}/role
#[put("/workspaces/{workspace_id}/members/{user_id}/role")]
pub async fn update_member_role(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<UpdateRoleRequest>,
) -> AppResult<HttpResponse> {
    let actor_id = session_user(&auth.identity)?;
    let (workspace_id, user_id) = path.into_inner();
    let member = services
        .memberships
        .update_role(workspace_id, user_id, body.role, actor_id, &auth.client)
        .await?;
    Ok(HttpResponse::Ok().json(MemberResponse::from(member)))
}

/// DELETE /workspaces/{workspace_id}/members/{user_id}
#[delete("/workspaces/{workspace_id}/members/{user_id}")]
pub async fn remove_member(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    let actor_id = session_user(&auth.identity)?;
    let (workspace_id, user_id) = path.into_inner();
    services
        .memberships
        .remove(workspace_id, user_id, actor_id, &auth.client)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /workspaces/{workspace_id}/leave
#[post("/workspaces/{workspace_id}/leave")]
pub async fn leave_workspace(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let actor_id = session_user(&auth.identity)?;
    services
        .memberships
        .leave(path.into_inner(), actor_id, &auth.client)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /workspaces/{workspace_id}/transfer-ownership
#[post("/workspaces/{workspace_id}/transfer-ownership")]
pub async fn transfer_ownership(
    services: web::Data<Services>,
    auth: Authenticated,
    path: web::Path<Uuid>,
    body: web::Json<TransferOwnershipRequest>,
) -> AppResult<HttpResponse> {
    let actor_id = session_user(&auth.identity)?;
    let (previous_owner, new_owner) = services
        .memberships
        .transfer_ownership(path.into_inner(), actor_id, body.new_owner_id, &auth.client)
        .await?;
    Ok(HttpResponse::Ok().json(TransferResponse {
        previous_owner: previous_owner.into(),
        new_owner: new_owner.into(),
    }))
}
