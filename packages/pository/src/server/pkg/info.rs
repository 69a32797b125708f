use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use crate::{
    api::{ErrorResponse, Identity},
    auth::Role,
    server::ServerState,
    storage::{PackageLocation, PackageMetadata},
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
) -> Result<Json<PackageMetadata>, ErrorResponse> {
    let loc = PackageLocation {
        repo: sanitized(&repo, "repo")?,
        distribution: sanitized(&distribution, "distribution")?,
        component: sanitized(&component, "component")?,
        architecture: sanitized(&architecture, "architecture")?,
        name: sanitized(&name, "package name")?,
        version: sanitized(&version, "version")?,
    };
    identity.require_role(Role::Read, Some(&loc.repo), Some(&loc.distribution))?;
    match state.storage.package_metadata(&loc).await? {
        Some(metadata) => Ok(Json(metadata)),
        None => Err(ErrorResponse::not_found("package")),
    }
}
