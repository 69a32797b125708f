use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::instrument;

use crate::{
    api::{ErrorResponse, Identity},
    auth::Role,
    server::ServerState,
    storage::PackageLocation,
};

use super::sanitized;

#[axum::debug_handler]
#[instrument(skip(state, identity))]
pub async fn handler(
    State(state): State<ServerState>,
    identity: Identity,
    Path((repo, distribution, component, architecture, name, version)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<StatusCode, ErrorResponse> {
    let loc = PackageLocation {
        repo: sanitized(&repo, "repo")?,
        distribution: sanitized(&distribution, "distribution")?,
        component: sanitized(&component, "component")?,
        architecture: sanitized(&architecture, "architecture")?,
        name: sanitized(&name, "package name")?,
        version: sanitized(&version, "version")?,
    };
    identity.require_role(Role::Admin, Some(&loc.repo), Some(&loc.distribution))?;
    if state.storage.delete_package(&loc).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ErrorResponse::not_found("package"))
    }
}
