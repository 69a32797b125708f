use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    api::{ErrorResponse, Identity},
    auth::Role,
    server::ServerState,
    storage::{ListFilters, PackageMetadata},
};

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct PackageListParams {
    pub repo: Option<String>,
    pub distribution: Option<String>,
    pub component: Option<String>,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PackageListResponse {
    pub packages: Vec<PackageMetadata>,
}

#[axum::debug_handler]
#[instrument(skip(state, identity))]
pub async fn handler(
    State(state): State<ServerState>,
    identity: Identity,
    Query(params): Query<PackageListParams>,
) -> Result<Json<PackageListResponse>, ErrorResponse> {
    identity.require_role(
        Role::Read,
        params.repo.as_deref(),
        params.distribution.as_deref(),
    )?;
    let filters = ListFilters {
        repo: params.repo,
        distribution: params.distribution,
        component: params.component,
        architecture: params.architecture,
        name: params.name,
        version: params.version,
    };
    let packages = state.storage.list_packages(&filters).await?;
    Ok(Json(PackageListResponse { packages }))
}
