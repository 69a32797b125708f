//! Package records: the location key, the immutable metadata written next to
//! each artifact, and the filters accepted by listing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::deb::ControlFields;

pub const PACKAGE_MIME: &str = "application/vnd.debian.binary-package";
pub const ARTIFACT_FILE: &str = "package.deb";
pub const METADATA_FILE: &str = "metadata.json";
pub const INDEX_FILE: &str = "index.json";

/// The primary key of an artifact: `(repo, distribution, component,
/// architecture, name, version)`, all sanitized and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageLocation {
    pub repo: String,
    pub distribution: String,
    pub component: String,
    pub architecture: String,
    pub name: String,
    pub version: String,
}

impl PackageLocation {
    /// Directory of the artifact relative to the data root.
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.repo)
            .join(&self.distribution)
            .join(&self.component)
            .join(&self.architecture)
            .join(&self.name)
            .join(&self.version)
    }

    pub fn deb_file_name(&self) -> String {
        format!("{}_{}_{}.deb", self.name, self.version, self.architecture)
    }
}

/// Immutable record created at upload. Field order here is the canonical
/// order of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub repo: String,
    pub distribution: String,
    pub component: String,
    pub architecture: String,
    pub name: String,
    pub version: String,

    pub size: u64,
    pub sha256: String,
    pub mime: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    pub uploader_key_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_depends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_size: Option<u64>,
}

impl PackageMetadata {
    pub fn location(&self) -> PackageLocation {
        PackageLocation {
            repo: self.repo.clone(),
            distribution: self.distribution.clone(),
            component: self.component.clone(),
            architecture: self.architecture.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Equality on the index key: the location without the repo, which is
    /// implied by the index the entry lives in.
    pub fn same_slot(&self, loc: &PackageLocation) -> bool {
        self.distribution == loc.distribution
            && self.component == loc.component
            && self.architecture == loc.architecture
            && self.name == loc.name
            && self.version == loc.version
    }

    /// Backfill optional control fields that are currently absent. Values
    /// come straight from the package's own control paragraph, never
    /// synthesized.
    pub fn merge_control(&mut self, control: &ControlFields) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.description, &control.description);
        fill(&mut self.multi_arch, &control.multi_arch);
        fill(&mut self.maintainer, &control.maintainer);
        fill(&mut self.depends, &control.depends);
        fill(&mut self.pre_depends, &control.pre_depends);
        fill(&mut self.suggests, &control.suggests);
        fill(&mut self.conflicts, &control.conflicts);
        fill(&mut self.breaks, &control.breaks);
        fill(&mut self.replaces, &control.replaces);
        fill(&mut self.provides, &control.provides);
        fill(&mut self.homepage, &control.homepage);
        fill(&mut self.section, &control.section);
        fill(&mut self.priority, &control.priority);
        if self.installed_size.is_none() {
            self.installed_size = control.installed_size;
        }
    }
}

/// Filters accepted by `list_packages`. All absent means everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilters {
    pub repo: Option<String>,
    pub distribution: Option<String>,
    pub component: Option<String>,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl ListFilters {
    pub fn matches(&self, entry: &PackageMetadata) -> bool {
        fn check(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }
        check(&self.repo, &entry.repo)
            && check(&self.distribution, &entry.distribution)
            && check(&self.component, &entry.component)
            && check(&self.architecture, &entry.architecture)
            && check(&self.name, &entry.name)
            && check(&self.version, &entry.version)
    }
}
