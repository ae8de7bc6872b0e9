//! Actix-web extractor for bearer authentication.
//!
//! # Security
//! - The bearer token is wrapped in `SecretString` as soon as it leaves the header
//! - Tokens are never logged; only the identity kind and key prefix are

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpRequest, web};
use futures_util::future::LocalBoxFuture;
use secrecy::{ExposeSecret, SecretString};

use super::{Identity, parse_bearer, reasons};
use crate::error::AppError;
use crate::models::SessionMetadata;
use crate::services::Services;

/// Extractor that requires a valid session token or API key.
///
/// ```ignore
/// async fn handler(auth: Authenticated) -> impl Responder {
///     // auth.identity is the resolved caller
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    /// Client details of the request, for sessions and audit events
    pub client: SessionMetadata,
}

/// Client ip and user agent of a request.
pub fn client_metadata(req: &HttpRequest) -> SessionMetadata {
    SessionMetadata {
        ip_address: req.connection_info().realip_remote_addr().map(str::to_string),
        user_agent: req
            .headers()
            .get(actix_web::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

impl FromRequest for Authenticated {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let services = req.app_data::<web::Data<Services>>().cloned();
        let client = client_metadata(req);

        // Extract the token - immediately wrapped in SecretString
        let token: Result<SecretString, AppError> = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthenticated(reasons::MISSING_CREDENTIAL))
            .and_then(|header| parse_bearer(header).map(|t| SecretString::from(t.to_string())));

        Box::pin(async move {
            let services = services.ok_or_else(|| {
                AppError::Internal("Services not registered as app data".to_string())
            })?;
            let token = token?;
            let identity = services
                .authenticator
                .resolve(token.expose_secret())
                .await?;
            Ok(Authenticated { identity, client })
        })
    }
}
