//! Membership administration: rank rules, last-owner guard, transfer and removal.

use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use workspace_authz::auth::permissions::{Permission, Role};
use workspace_authz::error::AppError;
use workspace_authz::models::SessionMetadata;
use workspace_authz::services::audit::actions;
use workspace_authz::services::memberships::reasons;
use workspace_authz::store::MemoryStoreOptions;

use crate::test_helpers::{
    CLIENT, role_of, test_env, test_env_failing_audit, test_env_with, test_settings, workspace_with,
};

#[actix_rt::test]
async fn test_admin_cannot_promote_to_admin() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Admin, Role::Editor]).await;
    let (bob, carol) = (users[1], users[2]);

    let result = env
        .services
        .memberships
        .update_role(ws, carol, Role::Admin, bob, &CLIENT)
        .await;

    assert_eq!(
        result.unwrap_err(),
        AppError::Forbidden(reasons::CANNOT_PROMOTE_TO_OWN_RANK)
    );
    assert_eq!(role_of(&env.services, ws, carol).await, Some(Role::Editor));
}

#[actix_rt::test]
async fn test_admin_promoting_to_owner_hits_rank_rule_first() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Admin, Role::Editor]).await;

    let result = env
        .services
        .memberships
        .update_role(ws, users[2], Role::Owner, users[1], &CLIENT)
        .await;

    assert_eq!(
        result.unwrap_err(),
        AppError::Forbidden(reasons::CANNOT_PROMOTE_TO_OWN_RANK)
    );
}

#[actix_rt::test]
async fn test_update_role_checks() {
    let env = test_env();
    let (ws, users) = workspace_with(
        &env.services,
        &[Role::Admin, Role::Admin, Role::Editor, Role::Viewer],
    )
    .await;
    let memberships = &env.services.memberships;
    let (owner, admin, other_admin, editor, viewer) =
        (users[0], users[1], users[2], users[3], users[4]);

    assert_eq!(
        memberships
            .update_role(ws, editor, Role::Viewer, Uuid::new_v4(), &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(reasons::NOT_A_MEMBER)
    );
    assert_eq!(
        memberships
            .update_role(ws, editor, Role::Viewer, viewer, &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(Permission::MembersManage.denial_reason())
    );
    assert_eq!(
        memberships
            .update_role(ws, owner, Role::Admin, owner, &CLIENT)
            .await
            .unwrap_err(),
        AppError::Conflict(reasons::CANNOT_MODIFY_SELF)
    );
    assert!(matches!(
        memberships
            .update_role(ws, Uuid::new_v4(), Role::Viewer, admin, &CLIENT)
            .await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(
        memberships
            .update_role(ws, other_admin, Role::Editor, admin, &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(reasons::INSUFFICIENT_RANK)
    );

    let updated = memberships
        .update_role(ws, viewer, Role::Editor, admin, &CLIENT)
        .await
        .unwrap();
    assert_eq!(updated.role, Role::Editor);
    assert_eq!(role_of(&env.services, ws, viewer).await, Some(Role::Editor));

    // Owners may grant any role, owner included.
    memberships
        .update_role(ws, admin, Role::Owner, owner, &CLIENT)
        .await
        .unwrap();
    assert_eq!(memberships.count_owners(ws).await.unwrap(), 2);
}

#[actix_rt::test]
async fn test_sole_owner_cannot_be_removed_by_anyone() {
    let env = test_env();
    let (ws, users) = workspace_with(
        &env.services,
        &[Role::Admin, Role::Editor, Role::Viewer],
    )
    .await;
    let owner = users[0];

    for actor in &users {
        let result = env.services.memberships.remove(ws, owner, *actor, &CLIENT).await;
        assert_eq!(
            result.unwrap_err(),
            AppError::Conflict(reasons::LAST_OWNER),
            "actor {actor} must hit the last-owner guard"
        );
    }
    assert_eq!(
        env.services.memberships.leave(ws, owner, &CLIENT).await.unwrap_err(),
        AppError::Conflict(reasons::LAST_OWNER)
    );
    assert_eq!(env.services.memberships.count_owners(ws).await.unwrap(), 1);
}

#[actix_rt::test]
async fn test_owners_do_not_change_each_others_roles() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Owner]).await;
    let memberships = &env.services.memberships;

    assert_eq!(
        memberships
            .update_role(ws, users[1], Role::Admin, users[0], &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(reasons::INSUFFICIENT_RANK)
    );

    // With two owners either one may leave.
    memberships.leave(ws, users[0], &CLIENT).await.unwrap();
    assert_eq!(memberships.count_owners(ws).await.unwrap(), 1);
    assert_eq!(role_of(&env.services, ws, users[1]).await, Some(Role::Owner));
}

#[actix_rt::test]
async fn test_transfer_then_remove_previous_owner() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Editor]).await;
    let (alice, carol) = (users[0], users[1]);
    let memberships = &env.services.memberships;

    let (demoted, promoted) = memberships
        .transfer_ownership(ws, alice, carol, &CLIENT)
        .await
        .unwrap();
    assert_eq!(demoted.role, Role::Admin);
    assert_eq!(promoted.role, Role::Owner);

    assert_eq!(role_of(&env.services, ws, alice).await, Some(Role::Admin));
    assert_eq!(role_of(&env.services, ws, carol).await, Some(Role::Owner));
    assert_eq!(memberships.count_owners(ws).await.unwrap(), 1);

    memberships.remove(ws, alice, carol, &CLIENT).await.unwrap();
    assert_eq!(role_of(&env.services, ws, alice).await, None);
    assert!(env.audit.actions().contains(&actions::OWNERSHIP_TRANSFERRED));
}

#[actix_rt::test]
async fn test_transfer_checks() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Admin]).await;
    let memberships = &env.services.memberships;

    assert_eq!(
        memberships
            .transfer_ownership(ws, users[1], users[0], &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(reasons::ONLY_OWNER_CAN_TRANSFER)
    );
    assert_eq!(
        memberships
            .transfer_ownership(ws, users[0], users[0], &CLIENT)
            .await
            .unwrap_err(),
        AppError::Conflict(reasons::CANNOT_TRANSFER_TO_SELF)
    );
    assert!(matches!(
        memberships
            .transfer_ownership(ws, users[0], Uuid::new_v4(), &CLIENT)
            .await,
        Err(AppError::NotFound(_))
    ));
}

#[actix_rt::test]
async fn test_remove_rules() {
    let env = test_env();
    let (ws, users) = workspace_with(
        &env.services,
        &[Role::Owner, Role::Admin, Role::Admin, Role::Editor],
    )
    .await;
    let memberships = &env.services.memberships;
    let (owner, co_owner, admin, other_admin, editor) =
        (users[0], users[1], users[2], users[3], users[4]);

    assert_eq!(
        memberships.remove(ws, admin, admin, &CLIENT).await.unwrap_err(),
        AppError::Conflict(reasons::CANNOT_REMOVE_SELF)
    );
    assert_eq!(
        memberships.remove(ws, admin, editor, &CLIENT).await.unwrap_err(),
        AppError::Forbidden(Permission::MembersRemove.denial_reason())
    );
    assert_eq!(
        memberships.remove(ws, co_owner, admin, &CLIENT).await.unwrap_err(),
        AppError::Forbidden(reasons::ONLY_OWNER_CAN_REMOVE_OWNER)
    );
    assert_eq!(
        memberships.remove(ws, other_admin, admin, &CLIENT).await.unwrap_err(),
        AppError::Forbidden(reasons::INSUFFICIENT_RANK)
    );

    memberships.remove(ws, editor, admin, &CLIENT).await.unwrap();
    memberships.remove(ws, co_owner, owner, &CLIENT).await.unwrap();

    let remaining: HashSet<Uuid> = memberships
        .list(ws)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.user_id)
        .collect();
    assert_eq!(remaining, HashSet::from([owner, admin, other_admin]));
}

#[actix_rt::test]
async fn test_remove_revokes_sessions() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Editor]).await;
    let editor = users[1];
    let sessions = &env.services.sessions;

    let session = sessions
        .create_session(editor, SessionMetadata::default())
        .await
        .unwrap();
    assert!(sessions.validate(session.session.id, editor).await.unwrap());

    env.services
        .memberships
        .remove(ws, editor, users[0], &CLIENT)
        .await
        .unwrap();

    assert!(!sessions.validate(session.session.id, editor).await.unwrap());
}

#[actix_rt::test]
async fn test_removed_member_is_absent_before_tombstone() {
    let env = test_env_with(
        MemoryStoreOptions {
            tombstone_delay: Duration::from_secs(60),
            ..Default::default()
        },
        test_settings(),
    );
    let (ws, users) = workspace_with(&env.services, &[Role::Owner, Role::Viewer]).await;
    let memberships = &env.services.memberships;

    memberships.remove(ws, users[1], users[0], &CLIENT).await.unwrap();
    memberships.leave(ws, users[2], &CLIENT).await.unwrap();

    assert!(matches!(
        memberships.get(ws, users[1]).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(role_of(&env.services, ws, users[2]).await, None);
    assert_eq!(memberships.count_owners(ws).await.unwrap(), 1);
    assert_eq!(memberships.list(ws).await.unwrap().len(), 1);

    // A removed member can be added again.
    memberships
        .add_member(ws, users[2], Role::Editor, users[0], &CLIENT)
        .await
        .unwrap();
    assert_eq!(role_of(&env.services, ws, users[2]).await, Some(Role::Editor));
}

#[actix_rt::test]
async fn test_add_member_checks() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Admin, Role::Viewer]).await;
    let memberships = &env.services.memberships;
    let (admin, viewer) = (users[1], users[2]);

    assert_eq!(
        memberships
            .add_member(ws, viewer, Role::Viewer, admin, &CLIENT)
            .await
            .unwrap_err(),
        AppError::Conflict(reasons::ALREADY_MEMBER)
    );
    assert_eq!(
        memberships
            .add_member(ws, Uuid::new_v4(), Role::Viewer, viewer, &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(Permission::MembersInvite.denial_reason())
    );
    assert_eq!(
        memberships
            .add_member(ws, Uuid::new_v4(), Role::Admin, admin, &CLIENT)
            .await
            .unwrap_err(),
        AppError::Forbidden(reasons::CANNOT_PROMOTE_TO_OWN_RANK)
    );

    let added = memberships
        .add_member(ws, Uuid::new_v4(), Role::Editor, admin, &CLIENT)
        .await
        .unwrap();
    assert_eq!(added.invited_by, Some(admin));
}

#[actix_rt::test]
async fn test_concurrent_owner_departures_keep_one_owner() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Owner]).await;
    let memberships = &env.services.memberships;

    let (first, second) = tokio::join!(
        memberships.leave(ws, users[0], &CLIENT),
        memberships.leave(ws, users[1], &CLIENT),
    );

    let succeeded = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(succeeded, 1, "exactly one owner may leave");
    assert_eq!(memberships.count_owners(ws).await.unwrap(), 1);
}

#[actix_rt::test]
async fn test_failing_audit_sink_does_not_fail_operations() {
    let services = test_env_failing_audit();
    let (ws, users) = workspace_with(&services, &[Role::Editor]).await;

    let updated = services
        .memberships
        .update_role(ws, users[1], Role::Viewer, users[0], &CLIENT)
        .await
        .unwrap();
    assert_eq!(updated.role, Role::Viewer);

    services
        .memberships
        .remove(ws, users[1], users[0], &CLIENT)
        .await
        .unwrap();
}

#[actix_rt::test]
async fn test_membership_audit_events_carry_client() {
    let env = test_env();
    let (ws, users) = workspace_with(&env.services, &[Role::Editor]).await;

    env.services
        .memberships
        .update_role(ws, users[1], Role::Viewer, users[0], &CLIENT)
        .await
        .unwrap();
    env.services
        .memberships
        .remove(ws, users[1], users[0], &CLIENT)
        .await
        .unwrap();

    let membership_events: Vec<_> = env
        .audit
        .events()
        .into_iter()
        .filter(|e| e.workspace == Some(ws))
        .collect();
    let recorded: Vec<&str> = membership_events.iter().map(|e| e.action).collect();
    assert_eq!(
        recorded,
        [
            actions::WORKSPACE_CREATED,
            actions::MEMBER_ADDED,
            actions::MEMBER_ROLE_UPDATED,
            actions::MEMBER_REMOVED,
        ]
    );
    for event in membership_events {
        assert_eq!(event.ip.as_deref(), Some("203.0.113.7"), "{}", event.action);
        assert_eq!(event.user_agent.as_deref(), Some("authz-tests/1.0"));
    }
}
