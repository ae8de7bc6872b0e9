//! Session lifecycle and revocation visibility.

use std::time::Duration;

use secrecy::ExposeSecret;
use uuid::Uuid;

use workspace_authz::config::AuthSettings;
use workspace_authz::error::AppError;
use workspace_authz::models::SessionMetadata;
use workspace_authz::services::audit::actions;
use workspace_authz::services::sessions::reasons;
use workspace_authz::store::MemoryStoreOptions;

use crate::test_helpers::{gated_env, slow_store_env, test_env, test_env_with, test_settings};

#[actix_rt::test]
async fn test_revoke_is_visible_to_the_next_validate() {
    let env = test_env();
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();

    let first = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    let second = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();

    // Warm the cache before revoking.
    assert!(sessions.validate(first.session.id, user_id).await.unwrap());

    sessions.revoke(first.session.id, user_id).await.unwrap();

    assert!(
        !sessions.validate(first.session.id, user_id).await.unwrap(),
        "revoked session must not validate"
    );
    assert!(
        sessions.validate(second.session.id, user_id).await.unwrap(),
        "other sessions of the user stay valid"
    );
}

#[actix_rt::test]
async fn test_revoke_without_cache() {
    let env = test_env_with(
        MemoryStoreOptions::default(),
        AuthSettings {
            session_cache_ttl: Duration::ZERO,
            ..test_settings()
        },
    );
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();

    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    assert!(sessions.validate(created.session.id, user_id).await.unwrap());

    sessions.revoke(created.session.id, user_id).await.unwrap();
    assert!(!sessions.validate(created.session.id, user_id).await.unwrap());
}

#[actix_rt::test]
async fn test_validate_checks_owner() {
    let env = test_env();
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();

    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();

    assert!(
        !sessions
            .validate(created.session.id, Uuid::new_v4())
            .await
            .unwrap(),
        "session must not validate for another user"
    );
    assert!(!sessions.validate(Uuid::new_v4(), user_id).await.unwrap());
}

#[actix_rt::test]
async fn test_revoke_twice_is_a_noop() {
    let env = test_env();
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();

    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    sessions.revoke(created.session.id, user_id).await.unwrap();
    let rows = env.store.row_count().await;

    sessions.revoke(created.session.id, user_id).await.unwrap();
    assert_eq!(env.store.row_count().await, rows, "no new version written");

    let missing = sessions.revoke(Uuid::new_v4(), user_id).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[actix_rt::test]
async fn test_authenticate_reasons() {
    let env = test_env();
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();

    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    let token = created.token.expose_secret().to_string();

    let authenticated = sessions.authenticate(&token).await.unwrap();
    assert_eq!(authenticated.session_id, created.session.id);
    assert_eq!(authenticated.user_id, user_id);

    assert_eq!(
        sessions.authenticate("not-a-token").await.unwrap_err(),
        AppError::Unauthenticated(reasons::MALFORMED_TOKEN)
    );

    // Same ids, different random part.
    let (ids, _) = token.rsplit_once('.').unwrap();
    let forged = format!("{ids}.{}", "0".repeat(64));
    assert_eq!(
        sessions.authenticate(&forged).await.unwrap_err(),
        AppError::Unauthenticated(reasons::SESSION_NOT_FOUND)
    );

    sessions.revoke(created.session.id, user_id).await.unwrap();
    assert_eq!(
        sessions.authenticate(&token).await.unwrap_err(),
        AppError::Unauthenticated(reasons::SESSION_REVOKED)
    );
}

#[actix_rt::test]
async fn test_session_expires() {
    let env = test_env_with(
        MemoryStoreOptions::default(),
        AuthSettings {
            session_ttl: Duration::from_millis(200),
            ..test_settings()
        },
    );
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();

    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    assert!(sessions.validate(created.session.id, user_id).await.unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!sessions.validate(created.session.id, user_id).await.unwrap());
    assert_eq!(
        sessions
            .authenticate(created.token.expose_secret())
            .await
            .unwrap_err(),
        AppError::Unauthenticated(reasons::SESSION_EXPIRED)
    );
}

#[actix_rt::test]
async fn test_revoke_all() {
    let env = test_env();
    let sessions = &env.services.sessions;
    let user_id = Uuid::new_v4();
    let other_user = Uuid::new_v4();

    let mut created = Vec::new();
    for _ in 0..3 {
        let session = sessions
            .create_session(user_id, SessionMetadata::default())
            .await
            .unwrap();
        assert!(sessions.validate(session.session.id, user_id).await.unwrap());
        created.push(session);
    }
    let unrelated = sessions
        .create_session(other_user, SessionMetadata::default())
        .await
        .unwrap();

    assert_eq!(sessions.revoke_all(user_id).await.unwrap(), 3);
    for session in &created {
        assert!(!sessions.validate(session.session.id, user_id).await.unwrap());
    }
    assert!(sessions.list_active(user_id).await.unwrap().is_empty());
    assert!(
        sessions
            .validate(unrelated.session.id, other_user)
            .await
            .unwrap()
    );

    // A later session is unaffected.
    let fresh = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    assert!(sessions.validate(fresh.session.id, user_id).await.unwrap());
    assert_eq!(sessions.list_active(user_id).await.unwrap().len(), 1);

    assert!(env.audit.actions().contains(&actions::SESSIONS_REVOKED_ALL));
}

#[actix_rt::test]
async fn test_slow_store_is_transient() {
    let env = slow_store_env();

    let result = env
        .services
        .sessions
        .create_session(Uuid::new_v4(), SessionMetadata::default())
        .await;

    let err = result.unwrap_err();
    assert!(
        matches!(err, AppError::Transient(_)),
        "expected Transient, got {err:?}"
    );
    assert!(err.is_retryable());
}

#[actix_rt::test]
async fn test_authenticate_in_flight_during_revoke_does_not_recache() {
    let (store, services) = gated_env();
    let sessions = &services.sessions;
    let user_id = Uuid::new_v4();
    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    let token = created.token.expose_secret().to_string();
    let session_id = created.session.id;

    // The authenticate read sees the session before the revocation lands.
    let (parked, release) = store.park_next_read("session");
    let (in_flight, ()) = tokio::join!(sessions.authenticate(&token), async {
        parked.await.unwrap();
        sessions.revoke(session_id, user_id).await.unwrap();
        release.send(()).unwrap();
    });
    assert!(in_flight.is_ok(), "the read started before the revocation");

    assert!(!sessions.validate(session_id, user_id).await.unwrap());
    assert_eq!(
        sessions.authenticate(&token).await.unwrap_err(),
        AppError::Unauthenticated(reasons::SESSION_REVOKED)
    );
}

#[actix_rt::test]
async fn test_validate_in_flight_during_revoke_all_does_not_recache() {
    let (store, services) = gated_env();
    let sessions = &services.sessions;
    let user_id = Uuid::new_v4();
    let created = sessions
        .create_session(user_id, SessionMetadata::default())
        .await
        .unwrap();
    let session_id = created.session.id;

    let (parked, release) = store.park_next_read("session");
    let (in_flight, revoked) = tokio::join!(sessions.validate(session_id, user_id), async {
        parked.await.unwrap();
        let revoked = sessions.revoke_all(user_id).await.unwrap();
        release.send(()).unwrap();
        revoked
    });
    assert!(in_flight.unwrap());
    assert_eq!(revoked, 1);

    assert!(!sessions.validate(session_id, user_id).await.unwrap());
}
