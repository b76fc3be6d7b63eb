use crate::error::ApiError;
use crate::server::AdminState;
use axum::{
    extract::State,
    http::{Method, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use jig_core::JigError;
use jig_store::Permissions;
use std::sync::Arc;

/// Permission a request method needs.
pub fn required_permission(method: &Method) -> (Permissions, &'static str) {
    match *method {
        Method::GET | Method::HEAD => (Permissions::READ, "read"),
        Method::DELETE => (Permissions::DELETE, "delete"),
        _ => (Permissions::DEPLOY, "deploy"),
    }
}

fn bearer(request: &Request<axum::body::Body>) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme == "Bearer" && !token.is_empty()).then_some(token)
}

/// Bearer token authentication plus per-method permission check. The
/// authenticated [`Token`](jig_store::Token) is left in the request
/// extensions for handlers.
pub async fn bearer_auth(
    State(state): State<Arc<AdminState>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = bearer(&request)
        .ok_or_else(|| JigError::Unauthorized("missing or malformed Authorization header".into()))?;
    let token = state
        .tokens
        .get(presented)
        .ok_or_else(|| JigError::Unauthorized("unknown token".into()))?;

    let (required, label) = required_permission(request.method());
    if !token.permissions.contains(required) {
        return Err(JigError::Forbidden(format!(
            "token '{}' lacks {label} permission",
            token.name
        ))
        .into());
    }

    tracing::debug!(
        token_name = %token.name,
        method = %request.method(),
        path = %request.uri().path(),
        "request authorized"
    );
    request.extensions_mut().insert(token);
    Ok(next.run(request).await)
}
