//! Request logging middleware.
//!
//! Logs method, path, status and duration, plus which kind of bearer credential
//! the request carried. Tokens never reach the log; for API keys only the display
//! prefix does.

use actix_web::Error;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::header::AUTHORIZATION;
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::rc::Rc;
use std::time::Instant;
use tracing::{info, warn};

use crate::auth::parse_bearer;
use crate::services::api_keys::KEY_DISPLAY_PREFIX_LENGTH;

/// Request logger middleware factory.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    api_key_prefix: Rc<str>,
}

impl RequestLogger {
    pub fn new(api_key_prefix: &str) -> Self {
        Self {
            api_key_prefix: Rc::from(format!("{api_key_prefix}_")),
        }
    }
}

/// `(kind, display prefix)` of the bearer credential in `header`.
fn describe_credential(header: Option<&str>, api_key_prefix: &str) -> (&'static str, String) {
    let Some(token) = header.and_then(|h| parse_bearer(h).ok()) else {
        return ("none", String::new());
    };
    if token.starts_with(api_key_prefix) {
        let shown: String = token.chars().take(KEY_DISPLAY_PREFIX_LENGTH).collect();
        ("api_key", shown)
    } else {
        ("session", String::new())
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service,
            api_key_prefix: Rc::clone(&self.api_key_prefix),
        }))
    }
}

/// Request logger middleware service.
pub struct RequestLoggerMiddleware<S> {
    service: S,
    api_key_prefix: Rc<str>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let (credential, key_prefix) = describe_credential(
            req.headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            &self.api_key_prefix,
        );

        info!(
            target: "api",
            method = %method,
            path = %path,
            remote_addr = %remote_addr,
            credential,
            key_prefix = %key_prefix,
            "→ Request started"
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            let elapsed = start.elapsed();
            let status = res.status();
            let status_code = status.as_u16();

            if status.is_success() || status.is_redirection() {
                info!(
                    target: "api",
                    method = %method,
                    path = %path,
                    status = %status_code,
                    credential,
                    duration_ms = %elapsed.as_millis(),
                    "← Request completed"
                );
            } else if status.is_client_error() {
                warn!(
                    target: "api",
                    method = %method,
                    path = %path,
                    status = %status_code,
                    credential,
                    key_prefix = %key_prefix,
                    duration_ms = %elapsed.as_millis(),
                    "← Client error"
                );
            } else {
                warn!(
                    target: "api",
                    method = %method,
                    path = %path,
                    status = %status_code,
                    credential,
                    duration_ms = %elapsed.as_millis(),
                    "← Server error"
                );
            }

            Ok(res)
        })
    }
}
