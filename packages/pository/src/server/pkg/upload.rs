//! Multipart package upload.

use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
    http::StatusCode,
};
use bytes::Bytes;
use tracing::instrument;

use crate::{
    api::{ErrorResponse, Identity},
    auth::{Role, policy},
    deb,
    server::ServerState,
    storage::{
        PackageLocation, PackageMetadata, is_valid_architecture, is_valid_package_name,
        is_valid_version,
    },
};

use super::{parse_deb_filename, sanitized};

#[axum::debug_handler]
#[instrument(skip(state, identity, multipart))]
pub async fn handler(
    State(state): State<ServerState>,
    identity: Identity,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PackageMetadata>), ErrorResponse> {
    // The whole package is held in memory while it is validated; the size
    // check below bounds that.
    let mut repo = String::from("default");
    let mut distribution = String::from("stable");
    let mut component = String::from("main");
    let mut architecture_field: Option<String> = None;
    let mut file: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ErrorResponse::validation(format!("could not parse multipart body: {err}"))
    })? {
        match field.name().unwrap_or_default() {
            "repo" => repo = text(field).await?,
            "distribution" => distribution = text(field).await?,
            "component" => component = text(field).await?,
            "architecture" => architecture_field = Some(text(field).await?),
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|err| {
                    ErrorResponse::validation(format!("could not read file part: {err}"))
                })?;
                file = Some((filename, bytes));
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ErrorResponse::validation("missing `file` part"))?;
    if bytes.len() as u64 > state.config.max_upload_size {
        return Err(ErrorResponse::payload_too_large(state.config.max_upload_size));
    }

    let info = deb::parse(&bytes).map_err(|err| ErrorResponse::validation(err.to_string()))?;
    let control = info.control.clone().unwrap_or_default();

    // Control fields win; the filename pattern is the fallback.
    let from_filename = parse_deb_filename(&filename);
    let name = control
        .package
        .clone()
        .or_else(|| from_filename.as_ref().map(|(name, _, _)| name.clone()))
        .ok_or_else(|| {
            ErrorResponse::validation("package name missing from control fields and filename")
        })?;
    let version = control
        .version
        .clone()
        .or_else(|| from_filename.as_ref().map(|(_, version, _)| version.clone()))
        .ok_or_else(|| {
            ErrorResponse::validation("package version missing from control fields and filename")
        })?;
    let architecture = control
        .architecture
        .clone()
        .or_else(|| from_filename.as_ref().and_then(|(_, _, arch)| arch.clone()))
        .or(architecture_field)
        .filter(|arch| !arch.is_empty())
        .unwrap_or_else(|| String::from("all"));

    let repo = sanitized(&repo, "repo")?;
    let distribution = sanitized(&distribution, "distribution")?;
    let component = sanitized(&component, "component")?;
    let name = sanitized(&name, "package name")?;
    let version = sanitized(&version, "version")?;
    let architecture = sanitized(&architecture, "architecture")?;
    if !is_valid_package_name(&name) {
        return Err(ErrorResponse::validation(format!(
            "invalid package name {name:?}"
        )));
    }
    if !is_valid_version(&version) {
        return Err(ErrorResponse::validation(format!(
            "invalid version {version:?}"
        )));
    }
    if !is_valid_architecture(&architecture) {
        return Err(ErrorResponse::validation(format!(
            "invalid architecture {architecture:?}"
        )));
    }

    if !state.config.repo_allowed(&repo) {
        return Err(ErrorResponse::repo_not_allowed(&repo));
    }

    match &identity {
        Identity::Workload(claims) => policy::authorize_upload(&state.config, claims, &name)
            .map_err(ErrorResponse::forbidden)?,
        Identity::Key(key) => {
            if !key.has_permission(Role::Write, Some(&repo), Some(&distribution)) {
                return Err(ErrorResponse::forbidden(format!(
                    "key {} may not upload to {repo}/{distribution}",
                    key.id
                )));
            }
        }
    }

    let loc = PackageLocation {
        repo,
        distribution,
        component,
        architecture,
        name,
        version,
    };
    let metadata = state
        .storage
        .store_package(&loc, &bytes, &identity.id(), info.control)
        .await?;
    state.metrics.upload_bytes_total.inc_by(metadata.size);

    Ok((StatusCode::CREATED, Json(metadata)))
}

async fn text(field: Field<'_>) -> Result<String, ErrorResponse> {
    field
        .text()
        .await
        .map_err(|err| ErrorResponse::validation(format!("could not read field: {err}")))
}
