//! Compatibility download route: `/repo/:dist/:comp/:arch/:filename` against
//! the implicit `default` repo. Whether it requires a `read` credential is a
//! config toggle; new deployments should prefer `/apt/<repo>/pool/...`.

use axum::{
    Extension,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::Response,
};
use tokio_util::io::ReaderStream;
use tracing::{error, instrument};

use crate::{
    api::{ErrorResponse, RequestIdentity, authenticate},
    auth::Role,
    server::ServerState,
    storage::{PACKAGE_MIME, PackageLocation},
};

use super::{parse_deb_filename, sanitized};

#[axum::debug_handler]
#[instrument(skip(state, headers, identity_slot))]
pub async fn handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    identity_slot: Option<Extension<RequestIdentity>>,
    Path((distribution, component, architecture, filename)): Path<(
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, ErrorResponse> {
    let distribution = sanitized(&distribution, "distribution")?;
    let component = sanitized(&component, "component")?;
    let architecture = sanitized(&architecture, "architecture")?;

    if state.config.download_auth {
        let identity = authenticate(&headers, &state).await?;
        identity.require_role(Role::Read, Some("default"), Some(&distribution))?;
        if let Some(Extension(slot)) = &identity_slot {
            slot.set(identity.id());
        }
    }

    let Some((name, version, filename_arch)) = parse_deb_filename(&filename) else {
        return Err(ErrorResponse::validation(
            "filename must match <name>_<version>[_<arch>].deb",
        ));
    };
    let loc = PackageLocation {
        repo: String::from("default"),
        distribution,
        component,
        architecture: filename_arch.unwrap_or(architecture),
        name: sanitized(&name, "package name")?,
        version: sanitized(&version, "version")?,
    };
    serve_package(&state, &loc).await
}

/// Stream a stored artifact with the download response headers. Shared with
/// the apt pool route.
pub(crate) async fn serve_package(
    state: &ServerState,
    loc: &PackageLocation,
) -> Result<Response, ErrorResponse> {
    let Some(path) = state.storage.package_file(loc).await else {
        return Err(ErrorResponse::not_found("package"));
    };
    let metadata = state.storage.package_metadata(loc).await?;
    let file = tokio::fs::File::open(&path).await.map_err(|err| {
        error!(path = %path.display(), %err, "could not open stored artifact");
        ErrorResponse::internal()
    })?;
    let size = file.metadata().await.ok().map(|meta| meta.len());

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, PACKAGE_MIME)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", loc.deb_file_name()),
        );
    if let Some(metadata) = &metadata {
        response = response.header("X-Checksum-Sha256", &metadata.sha256);
    }
    if let Some(size) = size {
        response = response.header(header::CONTENT_LENGTH, size);
        state.metrics.download_bytes_total.inc_by(size);
    }
    response
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|err| {
            error!(%err, "could not build download response");
            ErrorResponse::internal()
        })
}
