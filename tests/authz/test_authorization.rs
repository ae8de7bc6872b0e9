//! Authorization decisions for session and API key identities.

use secrecy::ExposeSecret;
use uuid::Uuid;

use workspace_authz::auth::permissions::{Permission, Role, Scope};
use workspace_authz::auth::{Decision, Identity, Requirement, reasons};
use workspace_authz::error::AppError;
use workspace_authz::models::SessionMetadata;
use workspace_authz::services::Services;
use workspace_authz::services::api_keys::NewApiKey;
use workspace_authz::services::memberships::reasons as membership_reasons;

use crate::test_helpers::{CLIENT, test_env, workspace_with};

async fn session_identity(services: &Services, user_id: Uuid) -> Identity {
    let created = services
        .sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    services
        .authenticator
        .resolve(created.token.expose_secret())
        .await
        .unwrap()
}

async fn key_identity(services: &Services, ws: Uuid, creator: Uuid, scopes: &[Scope]) -> Identity {
    let created = services
        .api_keys
        .create(
            ws,
            creator,
            NewApiKey {
                name: "reporting".to_string(),
                description: None,
                scopes: scopes.iter().copied().collect(),
                expires_at: None,
            },
        )
        .await
        .unwrap();
    services
        .authenticator
        .resolve(created.raw_key.expose_secret())
        .await
        .unwrap()
}

#[actix_rt::test]
async fn test_resolve_routes_by_prefix() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[]).await;

    let session = session_identity(&env.services, users[0]).await;
    assert!(matches!(session, Identity::Session { user_id, .. } if user_id == users[0]));

    let key = key_identity(&env.services, ws, users[0], &[Scope::EventsWrite]).await;
    match key {
        Identity::ApiKey {
            user_id,
            workspace_id,
            key_prefix,
            ..
        } => {
            assert_eq!(user_id, users[0]);
            assert_eq!(workspace_id, ws);
            assert!(key_prefix.starts_with("ak_"));
        }
        other => panic!("expected API key identity, got {other:?}"),
    }

    assert!(env.services.authenticator.resolve("garbage").await.is_err());
}

#[actix_rt::test]
async fn test_session_uses_role_table() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Editor]).await;
    let editor = session_identity(&env.services, users[1]).await;
    let authenticator = &env.services.authenticator;

    assert_eq!(
        authenticator
            .authorize(&editor, ws, Requirement::permission(Permission::DashboardsEdit))
            .await
            .unwrap(),
        Decision::Allow
    );
    assert_eq!(
        authenticator
            .authorize(&editor, ws, Requirement::permission(Permission::MembersManage))
            .await
            .unwrap(),
        Decision::Deny("missing permission: members.manage")
    );

    let (other_ws, _) = workspace_with(&env.services, &[]).await;
    assert_eq!(
        authenticator
            .authorize(&editor, other_ws, Requirement::permission(Permission::WorkspaceView))
            .await
            .unwrap(),
        Decision::Deny(membership_reasons::NOT_A_MEMBER)
    );
}

#[actix_rt::test]
async fn test_role_change_applies_to_existing_session() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Editor]).await;
    let editor = session_identity(&env.services, users[1]).await;
    let requirement = Requirement::permission(Permission::MembersInvite);
    let authenticator = &env.services.authenticator;

    assert!(
        !authenticator
            .authorize(&editor, ws, requirement)
            .await
            .unwrap()
            .is_allowed()
    );

    env.services
        .memberships
        .update_role(ws, users[1], Role::Admin, users[0], &CLIENT)
        .await
        .unwrap();
    assert!(
        authenticator
            .authorize(&editor, ws, requirement)
            .await
            .unwrap()
            .is_allowed()
    );

    env.services
        .memberships
        .update_role(ws, users[1], Role::Viewer, users[0], &CLIENT)
        .await
        .unwrap();
    assert!(
        !authenticator
            .authorize(&editor, ws, requirement)
            .await
            .unwrap()
            .is_allowed()
    );
}

#[actix_rt::test]
async fn test_api_key_uses_scopes() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[]).await;
    let key = key_identity(&env.services, ws, users[0], &[Scope::AnalyticsRead]).await;
    let authenticator = &env.services.authenticator;

    assert_eq!(
        authenticator
            .authorize(
                &key,
                ws,
                Requirement::with_scope(Permission::AnalyticsQuery, Scope::AnalyticsRead)
            )
            .await
            .unwrap(),
        Decision::Allow
    );
    assert_eq!(
        authenticator
            .authorize(
                &key,
                ws,
                Requirement::with_scope(Permission::DashboardsEdit, Scope::DashboardsWrite)
            )
            .await
            .unwrap(),
        Decision::Deny(Scope::DashboardsWrite.denial_reason())
    );
    // Key creator is owner, but a key never inherits the role.
    assert_eq!(
        authenticator
            .authorize(&key, ws, Requirement::permission(Permission::MembersManage))
            .await
            .unwrap(),
        Decision::Deny(reasons::NOT_AVAILABLE_TO_API_KEYS)
    );

    let (other_ws, _) = workspace_with(&env.services, &[]).await;
    assert_eq!(
        authenticator
            .authorize(
                &key,
                other_ws,
                Requirement::with_scope(Permission::AnalyticsQuery, Scope::AnalyticsRead)
            )
            .await
            .unwrap(),
        Decision::Deny(reasons::WRONG_WORKSPACE)
    );
}

#[actix_rt::test]
async fn test_api_key_survives_creator_removal() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Admin]).await;
    let key = key_identity(&env.services, ws, users[1], &[Scope::EventsWrite]).await;

    env.services
        .memberships
        .remove(ws, users[1], users[0], &CLIENT)
        .await
        .unwrap();

    assert!(
        env.services
            .authenticator
            .authorize(
                &key,
                ws,
                Requirement::with_scope(Permission::AnalyticsQuery, Scope::EventsWrite)
            )
            .await
            .unwrap()
            .is_allowed(),
        "keys are revoked explicitly, not by membership changes"
    );
}

#[actix_rt::test]
async fn test_require_turns_denial_into_forbidden() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Viewer]).await;
    let viewer = session_identity(&env.services, users[1]).await;

    assert_eq!(
        env.services
            .authenticator
            .require(&viewer, ws, Requirement::permission(Permission::DataExport))
            .await
            .unwrap_err(),
        AppError::Forbidden(Permission::DataExport.denial_reason())
    );
    env.services
        .authenticator
        .require(&viewer, ws, Requirement::permission(Permission::AnalyticsQuery))
        .await
        .unwrap();
}
