//! Account and session endpoints.

use actix_web::{HttpRequest, HttpResponse, get, post, web};
use secrecy::ExposeSecret;
use serde::Serialize;

use super::session_user;
use crate::auth::{Authenticated, Identity, client_metadata, reasons};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChangePasswordRequest, LoginRequest, LoginResponse, PasswordResetConfirm,
    PasswordResetRequest, SignupRequest, UserResponse,
};
use crate::services::Services;
use crate::services::mail::templates;

#[derive(Serialize)]
struct RevokedResponse {
    revoked: usize,
}

/// Configure auth routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(signup)
            .service(login)
            .service(logout)
            .service(logout_all)
            .service(me)
            .service(change_password)
            .service(confirm_password_reset)
            .service(request_password_reset),
    );
}

/// POST /auth/signup
#[post("/signup")]
pub async fn signup(
    services: web::Data<Services>,
    body: web::Json<SignupRequest>,
) -> AppResult<HttpResponse> {
    let user = services.users.register(&body.email, &body.password).await?;
    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

/// POST /auth/login
///
/// Returns the raw session token; it is not retrievable afterwards.
#[post("/login")]
pub async fn login(
    req: HttpRequest,
    services: web::Data<Services>,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let (user, created) = services
        .users
        .login(&body.email, &body.password, client_metadata(&req))
        .await?;

    Ok(HttpResponse::Ok().json(LoginResponse {
        session_id: created.session.id,
        user_id: user.id,
        token: created.token.expose_secret().to_string(),
        expires_at: created.session.expires_at.to_rfc3339(),
    }))
}

/// POST /auth/logout - revoke the calling session
#[post("/logout")]
pub async fn logout(services: web::Data<Services>, auth: Authenticated) -> AppResult<HttpResponse> {
    let Identity::Session {
        session_id,
        user_id,
    } = auth.identity
    else {
        return Err(AppError::Forbidden(reasons::NOT_AVAILABLE_TO_API_KEYS));
    };
    services.sessions.revoke(session_id, user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /auth/logout-all - revoke every session of the caller
#[post("/logout-all")]
pub async fn logout_all(
    services: web::Data<Services>,
    auth: Authenticated,
) -> AppResult<HttpResponse> {
    let user_id = session_user(&auth.identity)?;
    let revoked = services.sessions.revoke_all(user_id).await?;
    Ok(HttpResponse::Ok().json(RevokedResponse { revoked }))
}

/// GET /auth/me
#[get("/me")]
pub async fn me(services: web::Data<Services>, auth: Authenticated) -> AppResult<HttpResponse> {
    let user_id = session_user(&auth.identity)?;
    let user = services.users.get(user_id).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// POST /auth/password - change password, revoking all sessions
#[post("/password")]
pub async fn change_password(
    services: web::Data<Services>,
    auth: Authenticated,
    body: web::Json<ChangePasswordRequest>,
) -> AppResult<HttpResponse> {
    let user_id = session_user(&auth.identity)?;
    services
        .users
        .change_password(user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /auth/password-reset
///
/// Always 202, whether or not the email is known.
#[post("/password-reset")]
pub async fn request_password_reset(
    services: web::Data<Services>,
    body: web::Json<PasswordResetRequest>,
) -> AppResult<HttpResponse> {
    if let Some((user, token)) = services.users.request_password_reset(&body.email).await? {
        let data = serde_json::json!({ "token": token.expose_secret() });
        if let Err(e) = services
            .mail
            .send(None, &user.email, templates::PASSWORD_RESET, data)
            .await
        {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to queue password reset mail");
        }
    }
    Ok(HttpResponse::Accepted().finish())
}

/// POST /auth/password-reset/confirm
#[post("/password-reset/confirm")]
pub async fn confirm_password_reset(
    services: web::Data<Services>,
    body: web::Json<PasswordResetConfirm>,
) -> AppResult<HttpResponse> {
    services
        .users
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
