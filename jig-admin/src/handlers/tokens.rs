use crate::error::ApiResult;
use crate::server::AdminState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use jig_core::JigError;
use jig_store::{Permissions, Token};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateToken {
    pub name: String,
    /// Permission bits; the caller's own when omitted.
    #[serde(default)]
    pub permissions: Option<u8>,
}

/// Token names only; values are shown once, at creation.
pub async fn list_tokens(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let names: Vec<String> = state.tokens.list().into_iter().map(|t| t.name).collect();
    Json(json!({ "tokens": names }))
}

/// A caller can only hand out permissions it holds itself.
pub async fn create_token(
    State(state): State<Arc<AdminState>>,
    Extension(caller): Extension<Token>,
    Json(body): Json<CreateToken>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let permissions = body.permissions.map_or(caller.permissions, Permissions);
    if !caller.permissions.contains(permissions) {
        return Err(JigError::Forbidden(format!(
            "token '{}' cannot grant permissions {}",
            caller.name, permissions.0
        ))
        .into());
    }
    let token = state.tokens.make_with(&body.name, permissions)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "name": token.name,
            "token": token.token,
            "permissions": token.permissions,
        })),
    ))
}

pub async fn delete_token(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if state.tokens.delete(&name)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(JigError::NotFound(format!("token {name}")).into())
    }
}
