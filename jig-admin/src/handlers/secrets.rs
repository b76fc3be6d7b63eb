use crate::error::ApiResult;
use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use jig_core::JigError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateSecret {
    pub name: String,
    pub value: String,
}

pub async fn list_secrets(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({ "secrets": state.secrets.list() }))
}

pub async fn create_secret(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<CreateSecret>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.secrets.insert(&body.name, &body.value)?;
    Ok((StatusCode::CREATED, Json(json!({ "name": body.name }))))
}

pub async fn get_secret(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let value = state
        .secrets
        .get(&name)
        .ok_or_else(|| JigError::NotFound(format!("secret {name}")))?;
    Ok(Json(json!({ "name": name, "value": value })))
}

pub async fn delete_secret(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if state.secrets.delete(&name)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(JigError::NotFound(format!("secret {name}")).into())
    }
}
