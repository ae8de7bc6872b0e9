//! End-to-end flows through the HTTP layer.

use actix_web::http::Method;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::test_helpers::{create_test_app, send_json, test_env};

const PASSWORD: &str = "correct horse";

fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing {field} in {body}"))
}

/// Sign up and log in, returning `(user_id, token)`.
async fn signup_and_login<S>(app: &S, email: &str) -> (Uuid, String)
where
    S: actix_web::dev::Service<
            actix_http::Request,
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
        >,
{
    let (status, _) = send_json(
        app,
        Method::POST,
        "/api/v1/auth/signup",
        None,
        Some(json!({ "email": email, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, 201, "signup {email}");

    let (status, body) = send_json(
        app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": email, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, 200, "login {email}: {body}");

    let user_id = Uuid::parse_str(str_field(&body, "user_id")).unwrap();
    (user_id, str_field(&body, "token").to_string())
}

#[actix_rt::test]
async fn test_health_endpoints() {
    let env = test_env();
    let app = create_test_app(&env.services).await;

    let (status, body) = send_json(&app, Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, 200);
    assert!(body.is_object());

    let (status, _) = send_json(&app, Method::GET, "/api/v1/ready", None, None).await;
    assert_eq!(status, 200);
}

#[actix_rt::test]
async fn test_requests_without_credentials_are_rejected() {
    let env = test_env();
    let app = create_test_app(&env.services).await;

    let (status, body) = send_json(&app, Method::GET, "/api/v1/auth/me", None, None).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "UNAUTHENTICATED");

    let (status, _) = send_json(
        &app,
        Method::GET,
        "/api/v1/auth/me",
        Some("not-a-token"),
        None,
    )
    .await;
    assert_eq!(status, 401);
}

#[actix_rt::test]
async fn test_workspace_membership_flow() {
    let env = test_env();
    let app = create_test_app(&env.services).await;
    let (alice, alice_token) = signup_and_login(&app, "alice@example.com").await;
    let (bob, bob_token) = signup_and_login(&app, "bob@example.com").await;

    let (status, body) =
        send_json(&app, Method::POST, "/api/v1/workspaces", Some(&alice_token), None).await;
    assert_eq!(status, 201);
    let ws = str_field(&body, "workspace_id").to_string();
    assert_eq!(body["owner"]["role"], "owner");

    // Bob is not a member yet.
    let members_uri = format!("/api/v1/workspaces/{ws}/members");
    let (status, _) = send_json(&app, Method::GET, &members_uri, Some(&bob_token), None).await;
    assert_eq!(status, 403);

    let (status, _) = send_json(
        &app,
        Method::POST,
        &members_uri,
        Some(&alice_token),
        Some(json!({ "user_id": bob, "role": "editor" })),
    )
    .await;
    assert_eq!(status, 201);

    let (status, body) = send_json(&app, Method::GET, &members_uri, Some(&bob_token), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["members"].as_array().map(Vec::len), Some(2));

    // The sole owner cannot be removed.
    let (status, body) = send_json(
        &app,
        Method::DELETE,
        &format!("{members_uri}/{alice}"),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "CONFLICT");

    let (status, body) = send_json(
        &app,
        Method::POST,
        &format!("/api/v1/workspaces/{ws}/transfer-ownership"),
        Some(&alice_token),
        Some(json!({ "new_owner_id": bob })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["previous_owner"]["role"], "admin");
    assert_eq!(body["new_owner"]["role"], "owner");

    let (status, _) = send_json(
        &app,
        Method::DELETE,
        &format!("{members_uri}/{alice}"),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(status, 204);

    // Removal revoked Alice's sessions.
    let (status, _) = send_json(&app, Method::GET, "/api/v1/auth/me", Some(&alice_token), None).await;
    assert_eq!(status, 401);
}

#[actix_rt::test]
async fn test_api_key_flow() {
    let env = test_env();
    let app = create_test_app(&env.services).await;
    let (_, token) = signup_and_login(&app, "carol@example.com").await;

    let (_, body) = send_json(&app, Method::POST, "/api/v1/workspaces", Some(&token), None).await;
    let ws = str_field(&body, "workspace_id").to_string();
    let keys_uri = format!("/api/v1/workspaces/{ws}/api-keys");

    let (status, body) = send_json(
        &app,
        Method::POST,
        &keys_uri,
        Some(&token),
        Some(json!({ "name": "ingest", "scopes": ["analytics:read"], "expires_in": "30d" })),
    )
    .await;
    assert_eq!(status, 201, "{body}");
    let key = str_field(&body, "key").to_string();
    let key_id = str_field(&body, "id").to_string();
    assert!(key.starts_with(str_field(&body, "key_prefix")));

    let authorize_uri = format!("/api/v1/workspaces/{ws}/authorize");
    let (status, body) = send_json(
        &app,
        Method::POST,
        &authorize_uri,
        Some(&key),
        Some(json!({ "permission": "analytics.query", "scope": "analytics:read" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["allowed"], true);

    let (_, body) = send_json(
        &app,
        Method::POST,
        &authorize_uri,
        Some(&key),
        Some(json!({ "permission": "data.export", "scope": "data:export" })),
    )
    .await;
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "missing scope: data:export");

    // Keys cannot reach session-only operations.
    let (status, _) = send_json(
        &app,
        Method::GET,
        &format!("/api/v1/workspaces/{ws}/members"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, 403);

    let (status, body) = send_json(&app, Method::GET, &keys_uri, Some(&token), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["keys"][0]["status"], "active");
    assert!(body["keys"][0].get("key").is_none(), "raw key never listed");

    let (status, _) = send_json(
        &app,
        Method::DELETE,
        &format!("{keys_uri}/{key_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = send_json(
        &app,
        Method::POST,
        &authorize_uri,
        Some(&key),
        Some(json!({ "permission": "analytics.query", "scope": "analytics:read" })),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "UNAUTHENTICATED");
}

#[actix_rt::test]
async fn test_create_key_with_unpermitted_scope() {
    let env = test_env();
    let app = create_test_app(&env.services).await;
    let (_, owner_token) = signup_and_login(&app, "dave@example.com").await;
    let (admin, admin_token) = signup_and_login(&app, "erin@example.com").await;

    let (_, body) =
        send_json(&app, Method::POST, "/api/v1/workspaces", Some(&owner_token), None).await;
    let ws = str_field(&body, "workspace_id").to_string();
    send_json(
        &app,
        Method::POST,
        &format!("/api/v1/workspaces/{ws}/members"),
        Some(&owner_token),
        Some(json!({ "user_id": admin, "role": "admin" })),
    )
    .await;

    let keys_uri = format!("/api/v1/workspaces/{ws}/api-keys");
    let (status, body) = send_json(
        &app,
        Method::POST,
        &keys_uri,
        Some(&admin_token),
        Some(json!({ "name": "billing", "scopes": ["billing:read"] })),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"], "FORBIDDEN");

    let (_, body) = send_json(&app, Method::GET, &keys_uri, Some(&owner_token), None).await;
    assert_eq!(body["keys"].as_array().map(Vec::len), Some(0));
}

#[actix_rt::test]
async fn test_create_key_with_out_of_range_expiry() {
    let env = test_env();
    let app = create_test_app(&env.services).await;
    let (_, token) = signup_and_login(&app, "gwen@example.com").await;

    let (_, body) = send_json(&app, Method::POST, "/api/v1/workspaces", Some(&token), None).await;
    let ws = str_field(&body, "workspace_id").to_string();
    let keys_uri = format!("/api/v1/workspaces/{ws}/api-keys");

    for expires_in in ["100000000d", "9223372036854775807y", "soon"] {
        let (status, body) = send_json(
            &app,
            Method::POST,
            &keys_uri,
            Some(&token),
            Some(json!({ "name": "ingest", "scopes": ["analytics:read"], "expires_in": expires_in })),
        )
        .await;
        assert_eq!(status, 400, "{expires_in}: {body}");
        assert_eq!(body["error"], "INVALID_INPUT");
    }

    let (_, body) = send_json(&app, Method::GET, &keys_uri, Some(&token), None).await;
    assert_eq!(body["keys"].as_array().map(Vec::len), Some(0));
}

#[actix_rt::test]
async fn test_logout_and_password_reset() {
    let env = test_env();
    let app = create_test_app(&env.services).await;
    let (_, token) = signup_and_login(&app, "faye@example.com").await;

    let (status, body) = send_json(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["email"], "faye@example.com");

    let (status, _) = send_json(&app, Method::POST, "/api/v1/auth/logout", Some(&token), None).await;
    assert_eq!(status, 204);
    let (status, _) = send_json(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, 401);

    for email in ["faye@example.com", "nobody@example.com"] {
        let (status, _) = send_json(
            &app,
            Method::POST,
            "/api/v1/auth/password-reset",
            None,
            Some(json!({ "email": email })),
        )
        .await;
        assert_eq!(status, 202, "same answer for {email}");
    }

    let sent = env.mail.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "faye@example.com");
    let reset_token = sent[0].1["token"].as_str().unwrap().to_string();

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/auth/password-reset/confirm",
        None,
        Some(json!({ "token": reset_token, "new_password": "a new secret" })),
    )
    .await;
    assert_eq!(status, 204);

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": "faye@example.com", "password": "a new secret" })),
    )
    .await;
    assert_eq!(status, 200);
}
