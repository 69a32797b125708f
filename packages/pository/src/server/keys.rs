//! API key management endpoints. Admin only; the stored hash never appears
//! in a response, and the secret appears exactly once, at creation.

use axum::{Json, extract::{Path, State}, http::StatusCode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    api::{ErrorResponse, Identity},
    auth::{ApiKey, KeyScope, Role},
    server::ServerState,
};

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateKeyRequest {
    pub role: Role,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scope: Option<KeyScope>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyResponse {
    pub id: String,
    /// The secret; shown only in this response.
    pub key: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<KeyScope>,
}

/// Public view of a stored key.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<KeyScope>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<ApiKey> for KeyInfo {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            role: key.role,
            scope: key.scope,
            created_at: key.created_at,
            last_used: key.last_used,
            description: key.description,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct KeyListResponse {
    pub keys: Vec<KeyInfo>,
}

#[axum::debug_handler]
#[instrument(skip(state, identity, req))]
pub async fn create_handler(
    State(state): State<ServerState>,
    identity: Identity,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<CreateKeyResponse>), ErrorResponse> {
    identity.require_role(Role::Admin, None, None)?;
    let (key, secret) = state
        .keys
        .create_key(req.role, req.description, req.scope)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateKeyResponse {
            id: key.id,
            key: secret,
            role: key.role,
            description: key.description,
            scope: key.scope,
        }),
    ))
}

#[axum::debug_handler]
#[instrument(skip(state, identity))]
pub async fn list_handler(
    State(state): State<ServerState>,
    identity: Identity,
) -> Result<Json<KeyListResponse>, ErrorResponse> {
    identity.require_role(Role::Admin, None, None)?;
    let keys = state
        .keys
        .list_keys()
        .await?
        .into_iter()
        .map(KeyInfo::from)
        .collect();
    Ok(Json(KeyListResponse { keys }))
}

#[axum::debug_handler]
#[instrument(skip(state, identity))]
pub async fn delete_handler(
    State(state): State<ServerState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    identity.require_role(Role::Admin, None, None)?;
    if state.keys.delete_key(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ErrorResponse::not_found("key"))
    }
}
