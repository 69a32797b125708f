//! The storage engine owns the on-disk data tree:
//!
//! ```text
//! <dataRoot>/<repo>/index.json
//! <dataRoot>/<repo>/<dist>/<component>/<arch>/<name>/<version>/package.deb
//! <dataRoot>/<repo>/<dist>/<component>/<arch>/<name>/<version>/metadata.json
//! ```
//!
//! All other components reach the tree through this interface. Writes go
//! through temporary siblings renamed into place, so readers observe either
//! the previous state or the new one. Uploads to the same location are
//! serialized by a per-location lock; the per-repo index is guarded by its
//! own lock across the read-modify-write sequence and cached in memory with
//! write-through persistence.

pub mod index;
pub mod path;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use rand::RngCore as _;
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::{
    deb::{self, ControlFields},
    events::{EventBus, INDEX_CHANGED},
};

pub use index::{
    ARTIFACT_FILE, INDEX_FILE, ListFilters, METADATA_FILE, PACKAGE_MIME, PackageLocation,
    PackageMetadata,
};
pub use path::{is_valid_architecture, is_valid_package_name, is_valid_version, sanitize_path};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid package location")]
    InvalidLocation,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt index for repo {repo}: {source}")]
    CorruptIndex {
        repo: String,
        source: serde_json::Error,
    },
    #[error("corrupt metadata at {path}: {source}")]
    CorruptMetadata {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Default)]
struct RepoCell {
    /// `None` until the index file has been loaded (and self-healed) once.
    index: Mutex<Option<Vec<PackageMetadata>>>,
}

pub struct Storage {
    root: PathBuf,
    repos: StdMutex<HashMap<String, Arc<RepoCell>>>,
    location_locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    events: Arc<EventBus>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, events: Arc<EventBus>) -> Self {
        Self {
            root: root.into(),
            repos: StdMutex::new(HashMap::new()),
            location_locks: StdMutex::new(HashMap::new()),
            events,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.root
    }

    /// Store an artifact with its metadata and update the repo index.
    /// Overwriting an existing location is an idempotent replace.
    #[instrument(skip(self, bytes, control), fields(repo = %loc.repo, name = %loc.name, version = %loc.version))]
    pub async fn store_package(
        &self,
        loc: &PackageLocation,
        bytes: &[u8],
        uploader_id: &str,
        control: Option<ControlFields>,
    ) -> Result<PackageMetadata, StorageError> {
        validate_location(loc)?;
        let _serialize = self.location_lock(loc);
        let _guard = _serialize.lock().await;

        let dir = self.root.join(loc.relative_dir());
        tokio::fs::create_dir_all(&dir).await?;

        let sha256 = hex::encode(Sha256::digest(bytes));
        let artifact = dir.join(ARTIFACT_FILE);
        write_atomic(&artifact, bytes).await?;

        // Enrich through dpkg-deb when upload-time extraction came up short.
        let mut control = control.unwrap_or_default();
        if control.description.is_none() {
            if let Some(extracted) = deb::extract_with_dpkg(&artifact).await {
                merge_missing(&mut control, &extracted);
            }
        }

        let metadata = PackageMetadata {
            repo: loc.repo.clone(),
            distribution: loc.distribution.clone(),
            component: loc.component.clone(),
            architecture: loc.architecture.clone(),
            name: loc.name.clone(),
            version: loc.version.clone(),
            size: bytes.len() as u64,
            sha256,
            mime: String::from(PACKAGE_MIME),
            uploaded_at: OffsetDateTime::now_utc(),
            uploader_key_id: uploader_id.to_string(),
            description: control.description,
            multi_arch: control.multi_arch,
            maintainer: control.maintainer,
            depends: control.depends,
            pre_depends: control.pre_depends,
            suggests: control.suggests,
            conflicts: control.conflicts,
            breaks: control.breaks,
            replaces: control.replaces,
            provides: control.provides,
            homepage: control.homepage,
            section: control.section,
            priority: control.priority,
            installed_size: control.installed_size,
        };
        write_json_atomic(&dir.join(METADATA_FILE), &metadata).await?;

        // Write-through: the cached index is replaced only once the on-disk
        // index has been renamed into place.
        let cell = self.repo_cell(&loc.repo);
        let mut slot = cell.index.lock().await;
        self.ensure_loaded(&loc.repo, &mut slot).await?;
        let mut entries = slot.as_ref().expect("index loaded above").clone();
        match entries.iter_mut().find(|e| e.same_slot(loc)) {
            Some(existing) => *existing = metadata.clone(),
            None => entries.push(metadata.clone()),
        }
        self.persist_index(&loc.repo, &entries).await?;
        *slot = Some(entries);
        drop(slot);
        self.events.emit(INDEX_CHANGED, &loc.repo);

        Ok(metadata)
    }

    /// Absolute path of the stored artifact, without copying.
    pub async fn package_file(&self, loc: &PackageLocation) -> Option<PathBuf> {
        validate_location(loc).ok()?;
        let path = self.root.join(loc.relative_dir()).join(ARTIFACT_FILE);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    pub async fn package_metadata(
        &self,
        loc: &PackageLocation,
    ) -> Result<Option<PackageMetadata>, StorageError> {
        validate_location(loc)?;
        let path = self.root.join(loc.relative_dir()).join(METADATA_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let metadata =
            serde_json::from_slice(&raw).map_err(|source| StorageError::CorruptMetadata {
                path,
                source,
            })?;
        Ok(Some(metadata))
    }

    /// Remove the artifact, its index entry and any parent directories that
    /// become empty. Returns `false` when nothing was there to delete.
    #[instrument(skip(self), fields(repo = %loc.repo, name = %loc.name, version = %loc.version))]
    pub async fn delete_package(&self, loc: &PackageLocation) -> Result<bool, StorageError> {
        validate_location(loc)?;
        let _serialize = self.location_lock(loc);
        let _guard = _serialize.lock().await;

        let dir = self.root.join(loc.relative_dir());
        let existed_on_disk = tokio::fs::metadata(&dir).await.is_ok();

        // Index first; readers treat an index-without-artifact window as 404.
        let cell = self.repo_cell(&loc.repo);
        let mut slot = cell.index.lock().await;
        self.ensure_loaded(&loc.repo, &mut slot).await?;
        let mut entries = slot.as_ref().expect("index loaded above").clone();
        let before = entries.len();
        entries.retain(|e| !e.same_slot(loc));
        let removed_entry = entries.len() != before;
        if removed_entry {
            self.persist_index(&loc.repo, &entries).await?;
            *slot = Some(entries);
        }
        drop(slot);

        if existed_on_disk {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            self.prune_empty_parents(dir.parent()).await;
        }
        if removed_entry {
            self.events.emit(INDEX_CHANGED, &loc.repo);
        }
        Ok(existed_on_disk || removed_entry)
    }

    /// All index entries matching the filters, across every repo unless
    /// `filters.repo` narrows it.
    pub async fn list_packages(
        &self,
        filters: &ListFilters,
    ) -> Result<Vec<PackageMetadata>, StorageError> {
        let repos = match &filters.repo {
            Some(repo) => vec![repo.clone()],
            None => self.discover_repos().await?,
        };
        let mut out = Vec::new();
        for repo in repos {
            let cell = self.repo_cell(&repo);
            let mut slot = cell.index.lock().await;
            self.ensure_loaded(&repo, &mut slot).await?;
            let entries = slot.as_ref().expect("index loaded above");
            out.extend(entries.iter().filter(|e| filters.matches(e)).cloned());
        }
        Ok(out)
    }

    /// `(total artifact bytes, package count)` across all repos.
    pub async fn stats(&self) -> Result<(u64, u64), StorageError> {
        let all = self.list_packages(&ListFilters::default()).await?;
        Ok((all.iter().map(|p| p.size).sum(), all.len() as u64))
    }

    /// Readiness probe: the data root must be readable and writable.
    pub async fn is_ready(&self) -> bool {
        let mut suffix = [0u8; 8];
        rand::rng().fill_bytes(&mut suffix);
        let probe = self.root.join(format!(".readyz-{}", hex::encode(suffix)));
        if tokio::fs::write(&probe, b"ok").await.is_err() {
            return false;
        }
        let readable = tokio::fs::read(&probe).await.is_ok();
        let _ = tokio::fs::remove_file(&probe).await;
        readable
    }

    fn repo_cell(&self, repo: &str) -> Arc<RepoCell> {
        self.repos
            .lock()
            .expect("repo registry poisoned")
            .entry(repo.to_string())
            .or_default()
            .clone()
    }

    fn location_lock(&self, loc: &PackageLocation) -> Arc<Mutex<()>> {
        self.location_locks
            .lock()
            .expect("location lock registry poisoned")
            .entry(loc.relative_dir())
            .or_default()
            .clone()
    }

    /// Load the repo index on first use, running the self-heal pass over
    /// entries that are missing their control-extracted description.
    async fn ensure_loaded(
        &self,
        repo: &str,
        slot: &mut Option<Vec<PackageMetadata>>,
    ) -> Result<(), StorageError> {
        if slot.is_some() {
            return Ok(());
        }
        let path = self.root.join(repo).join(INDEX_FILE);
        let mut entries: Vec<PackageMetadata> = match tokio::fs::read(&path).await {
            Ok(raw) => {
                serde_json::from_slice(&raw).map_err(|source| StorageError::CorruptIndex {
                    repo: repo.to_string(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        if self.self_heal(&mut entries).await {
            if let Err(err) = self.persist_index(repo, &entries).await {
                warn!(repo, %err, "could not persist self-healed index");
            }
        }
        *slot = Some(entries);
        Ok(())
    }

    /// Best-effort backfill of control fields for entries uploaded before
    /// extraction succeeded. Failures are silent by design of the pass; the
    /// entry simply stays lean.
    async fn self_heal(&self, entries: &mut [PackageMetadata]) -> bool {
        let mut changed = false;
        for entry in entries.iter_mut() {
            if entry.description.is_some() {
                continue;
            }
            let dir = self.root.join(entry.location().relative_dir());
            let artifact = dir.join(ARTIFACT_FILE);
            if tokio::fs::metadata(&artifact).await.is_err() {
                continue;
            }
            let Some(control) = deb::extract_with_dpkg(&artifact).await else {
                continue;
            };
            let healed = {
                let mut candidate = entry.clone();
                candidate.merge_control(&control);
                candidate
            };
            if healed == *entry {
                continue;
            }
            match write_json_atomic(&dir.join(METADATA_FILE), &healed).await {
                Ok(()) => {
                    *entry = healed;
                    changed = true;
                }
                Err(err) => {
                    debug!(name = %entry.name, version = %entry.version, %err,
                        "self-heal metadata rewrite failed");
                }
            }
        }
        changed
    }

    async fn persist_index(
        &self,
        repo: &str,
        entries: &[PackageMetadata],
    ) -> Result<(), StorageError> {
        let dir = self.root.join(repo);
        tokio::fs::create_dir_all(&dir).await?;
        write_json_atomic(&dir.join(INDEX_FILE), &entries).await?;
        Ok(())
    }

    async fn discover_repos(&self) -> Result<Vec<String>, StorageError> {
        let mut repos = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(repos),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if tokio::fs::metadata(entry.path().join(INDEX_FILE))
                .await
                .is_ok()
            {
                repos.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        repos.sort();
        Ok(repos)
    }

    /// Remove directories that became empty, walking upward and stopping at
    /// the data root.
    async fn prune_empty_parents(&self, start: Option<&Path>) {
        let mut current = start.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let empty = match tokio::fs::read_dir(&dir).await {
                Ok(mut listing) => matches!(listing.next_entry().await, Ok(None)),
                Err(_) => break,
            };
            if !empty {
                break;
            }
            if tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }
}

fn validate_location(loc: &PackageLocation) -> Result<(), StorageError> {
    let components = [
        &loc.repo,
        &loc.distribution,
        &loc.component,
        &loc.architecture,
        &loc.name,
        &loc.version,
    ];
    for component in components {
        if component.is_empty() || sanitize_path(component) != **component {
            return Err(StorageError::InvalidLocation);
        }
    }
    Ok(())
}

fn merge_missing(target: &mut ControlFields, extracted: &ControlFields) {
    fn fill(slot: &mut Option<String>, value: &Option<String>) {
        if slot.is_none() {
            slot.clone_from(value);
        }
    }
    fill(&mut target.description, &extracted.description);
    fill(&mut target.multi_arch, &extracted.multi_arch);
    fill(&mut target.maintainer, &extracted.maintainer);
    fill(&mut target.depends, &extracted.depends);
    fill(&mut target.pre_depends, &extracted.pre_depends);
    fill(&mut target.suggests, &extracted.suggests);
    fill(&mut target.conflicts, &extracted.conflicts);
    fill(&mut target.breaks, &extracted.breaks);
    fill(&mut target.replaces, &extracted.replaces);
    fill(&mut target.provides, &extracted.provides);
    fill(&mut target.homepage, &extracted.homepage);
    fill(&mut target.section, &extracted.section);
    fill(&mut target.priority, &extracted.priority);
    if target.installed_size.is_none() {
        target.installed_size = extracted.installed_size;
    }
}

/// Write through a temporary sibling and rename into place. The temp file is
/// removed if the write is abandoned partway.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut suffix = [0u8; 8];
    rand::rng().fill_bytes(&mut suffix);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp-{}", hex::encode(suffix)));
    let guard = TempGuard {
        path: Some(tmp.clone()),
    };
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    guard.disarm();
    Ok(())
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let mut raw = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    raw.push(b'\n');
    write_atomic(path, &raw).await
}

struct TempGuard {
    path: Option<PathBuf>,
}

impl TempGuard {
    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
