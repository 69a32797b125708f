//! The apt-compatible wire layout: `Release`, per-slice `Packages` and pool
//! downloads, all unauthenticated.
//!
//! Slices fold `Architecture: all` packages into every native architecture,
//! and no `binary-all` index exists; serving one would make apt see those
//! packages twice and report them as perpetually upgradeable.

use std::collections::{BTreeMap, BTreeSet};

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use md5::Md5;
use sha2::Digest as _;
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    api::ErrorResponse,
    apt::{PackagesIndex, ReleaseFile},
    server::ServerState,
    storage::{ListFilters, PackageLocation, PackageMetadata},
};

use super::pkg::{parse_deb_filename, sanitized};

const TEXT_UTF8: &str = "text/plain; charset=utf-8";

#[axum::debug_handler]
#[instrument(skip(state))]
pub async fn release_handler(
    State(state): State<ServerState>,
    Path((repo, distribution)): Path<(String, String)>,
) -> Result<Response, ErrorResponse> {
    let repo = sanitized(&repo, "repo")?;
    let distribution = sanitized(&distribution, "distribution")?;
    let entries = distribution_entries(&state, &repo, &distribution).await?;

    // Explicit native architectures from stored entries; amd64 is always
    // advertised. `all` is not an architecture of its own on the wire.
    let mut architectures: BTreeSet<String> = entries
        .iter()
        .filter(|e| e.architecture != "all")
        .map(|e| e.architecture.clone())
        .collect();
    architectures.insert(String::from("amd64"));
    let components: BTreeSet<String> = entries.iter().map(|e| e.component.clone()).collect();

    let mut md5_cache = BTreeMap::new();
    let mut indexes = Vec::new();
    for component in &components {
        for architecture in &architectures {
            let slice = slice_entries(&entries, component, architecture);
            if slice.is_empty() {
                continue;
            }
            let paired = with_artifact_md5(&state, slice, &mut md5_cache).await;
            indexes.push(PackagesIndex::from_entries(component, architecture, &paired));
        }
    }

    let release = ReleaseFile::from_indexes(
        &repo,
        &distribution,
        OffsetDateTime::now_utc(),
        &architectures,
        &components,
        &indexes,
    );
    Ok(([(header::CONTENT_TYPE, TEXT_UTF8)], release.contents).into_response())
}

#[axum::debug_handler]
#[instrument(skip(state))]
pub async fn packages_handler(
    State(state): State<ServerState>,
    Path((repo, distribution, component, binary)): Path<(String, String, String, String)>,
) -> Result<Response, ErrorResponse> {
    let repo = sanitized(&repo, "repo")?;
    let distribution = sanitized(&distribution, "distribution")?;
    let component = sanitized(&component, "component")?;
    let Some(architecture) = binary.strip_prefix("binary-") else {
        return Err(ErrorResponse::not_found("index"));
    };
    if architecture == "all" {
        // `all` packages live inside every native slice instead.
        return Err(ErrorResponse::not_found("index"));
    }
    let architecture = sanitized(architecture, "architecture")?;

    let entries = distribution_entries(&state, &repo, &distribution).await?;
    let slice = slice_entries(&entries, &component, &architecture);
    let mut md5_cache = BTreeMap::new();
    let paired = with_artifact_md5(&state, slice, &mut md5_cache).await;
    let index = PackagesIndex::from_entries(&component, &architecture, &paired);
    Ok(([(header::CONTENT_TYPE, TEXT_UTF8)], index.contents).into_response())
}

#[axum::debug_handler]
#[instrument(skip(state))]
pub async fn pool_handler(
    State(state): State<ServerState>,
    Path((repo, distribution, component, architecture, filename)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, ErrorResponse> {
    let repo = sanitized(&repo, "repo")?;
    let distribution = sanitized(&distribution, "distribution")?;
    let component = sanitized(&component, "component")?;
    sanitized(&architecture, "architecture")?;

    let Some((name, version, Some(file_architecture))) = parse_deb_filename(&filename) else {
        return Err(ErrorResponse::validation(
            "filename must match <name>_<version>_<arch>.deb",
        ));
    };
    let loc = PackageLocation {
        repo,
        distribution,
        component,
        architecture: sanitized(&file_architecture, "architecture")?,
        name: sanitized(&name, "package name")?,
        version: sanitized(&version, "version")?,
    };
    super::pkg::download::serve_package(&state, &loc).await
}

async fn distribution_entries(
    state: &ServerState,
    repo: &str,
    distribution: &str,
) -> Result<Vec<PackageMetadata>, ErrorResponse> {
    let filters = ListFilters {
        repo: Some(repo.to_string()),
        distribution: Some(distribution.to_string()),
        ..ListFilters::default()
    };
    Ok(state.storage.list_packages(&filters).await?)
}

/// The entries of one `(component, architecture)` slice: native matches plus
/// every `Architecture: all` package of the component.
fn slice_entries(
    entries: &[PackageMetadata],
    component: &str,
    architecture: &str,
) -> Vec<PackageMetadata> {
    entries
        .iter()
        .filter(|e| {
            e.component == component
                && (e.architecture == architecture || e.architecture == "all")
        })
        .cloned()
        .collect()
}

/// Pair each entry with the MD5 of its artifact on disk, caching by content
/// hash so a Release render reads every artifact at most once.
async fn with_artifact_md5(
    state: &ServerState,
    entries: Vec<PackageMetadata>,
    cache: &mut BTreeMap<String, Option<String>>,
) -> Vec<(PackageMetadata, Option<String>)> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let md5 = match cache.get(&entry.sha256) {
            Some(cached) => cached.clone(),
            None => {
                let computed = match state.storage.package_file(&entry.location()).await {
                    Some(path) => tokio::fs::read(&path)
                        .await
                        .ok()
                        .map(|bytes| hex::encode(Md5::digest(&bytes))),
                    None => None,
                };
                cache.insert(entry.sha256.clone(), computed.clone());
                computed
            }
        };
        out.push((entry, md5));
    }
    out
}
