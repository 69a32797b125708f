//! Request authentication.
//!
//! Resolution order: `Authorization: Bearer <jwt>` verifies as a workload
//! identity; otherwise `X-Api-Key` resolves against the key store. Bearer
//! takes precedence when both are present.

use std::sync::{Arc, OnceLock};

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request},
};

use crate::{
    auth::{ApiKey, Role, WorkloadClaims},
    server::ServerState,
};

use super::ErrorResponse;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub enum Identity {
    Key(ApiKey),
    Workload(WorkloadClaims),
}

impl Identity {
    /// The uploader identity string recorded in package metadata and access
    /// logs: the key id, or `oidc:<owner>/<repo>`.
    pub fn id(&self) -> String {
        match self {
            Identity::Key(key) => key.id.clone(),
            Identity::Workload(claims) => format!("oidc:{}", claims.repository),
        }
    }

    /// Role gate for the management endpoints. Workload identities carry no
    /// role; they may read, and their upload rights are decided by the
    /// upload policy instead.
    pub fn require_role(
        &self,
        required: Role,
        repo: Option<&str>,
        distribution: Option<&str>,
    ) -> Result<(), ErrorResponse> {
        match self {
            Identity::Key(key) => {
                if key.has_permission(required, repo, distribution) {
                    Ok(())
                } else {
                    Err(ErrorResponse::forbidden(format!(
                        "key {} does not grant {required:?} here",
                        key.id
                    )))
                }
            }
            Identity::Workload(claims) => {
                if required == Role::Read {
                    Ok(())
                } else {
                    Err(ErrorResponse::forbidden(format!(
                        "workload identity {} cannot perform {required:?} operations",
                        claims.repository
                    )))
                }
            }
        }
    }
}

/// Resolve the request credentials to an identity.
pub async fn authenticate(
    headers: &HeaderMap,
    state: &ServerState,
) -> Result<Identity, ErrorResponse> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let token = value
            .to_str()
            .map_err(|_| ErrorResponse::unauthorized("`Authorization` header is malformed"))?
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                ErrorResponse::unauthorized("`Authorization` scheme must be `Bearer`")
            })?;
        let Some(oidc) = &state.oidc else {
            return Err(ErrorResponse::unauthorized(
                "workload identity is not configured",
            ));
        };
        let claims = oidc.verify(token).await?;
        return Ok(Identity::Workload(claims));
    }

    let Some(value) = headers.get(API_KEY_HEADER) else {
        return Err(ErrorResponse::auth_missing());
    };
    let secret = value
        .to_str()
        .map_err(|_| ErrorResponse::unauthorized("`X-Api-Key` header is malformed"))?;
    match state.keys.validate_key(secret).await? {
        Some(key) => Ok(Identity::Key(key)),
        None => Err(ErrorResponse::unauthorized("invalid API key")),
    }
}

impl<S> FromRequestParts<S> for Identity
where
    ServerState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let state = ServerState::from_ref(state);
        let identity = authenticate(&parts.headers, &state).await?;
        if let Some(cell) = parts.extensions.get::<RequestIdentity>() {
            cell.set(identity.id());
        }
        Ok(identity)
    }
}

/// Slot the request-tracking middleware plants in the request extensions so
/// the access log can carry the identity the extractor later resolves.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity(Arc<OnceLock<String>>);

impl RequestIdentity {
    pub fn set(&self, id: String) {
        let _ = self.0.set(id);
    }

    pub fn get(&self) -> Option<String> {
        self.0.get().cloned()
    }
}
