//! `Packages` document rendering.
//!
//! The rendering is byte-stable: entries are sorted, the stanza field order
//! is fixed, and optional fields appear exactly when the stored metadata
//! carries them. `Multi-Arch` and `Installed-Size` in particular are never
//! synthesized; emitting a value the package's own control file did not
//! declare makes dpkg record it at install time and every later
//! `apt-get update` then reports the package as perpetually upgradeable.

use std::fmt::Write as _;

use md5::Md5;
use sha2::{Digest as _, Sha256};

use crate::storage::PackageMetadata;

#[derive(Clone, Debug)]
pub struct PackagesIndex {
    pub component: String,
    pub architecture: String,
    pub contents: String,
    pub size: u64,
    pub md5sum: String,
    pub sha256sum: String,
}

impl PackagesIndex {
    /// Render one `binary-<arch>` slice. Each entry is paired with the MD5
    /// of its artifact on disk, when that was readable.
    pub fn from_entries(
        component: &str,
        architecture: &str,
        entries: &[(PackageMetadata, Option<String>)],
    ) -> Self {
        let contents = render(entries);
        Self {
            component: component.to_string(),
            architecture: architecture.to_string(),
            size: contents.len() as u64,
            md5sum: hex::encode(Md5::digest(&contents)),
            sha256sum: hex::encode(Sha256::digest(&contents)),
            contents,
        }
    }
}

fn render(entries: &[(PackageMetadata, Option<String>)]) -> String {
    let mut sorted: Vec<&(PackageMetadata, Option<String>)> = entries.iter().collect();
    sorted.sort_by(|(a, _), (b, _)| {
        (&a.name, &a.version, &a.architecture).cmp(&(&b.name, &b.version, &b.architecture))
    });

    let stanzas: Vec<String> = sorted
        .into_iter()
        .map(|(entry, md5)| render_stanza(entry, md5.as_deref()))
        .collect();
    if stanzas.is_empty() {
        return String::new();
    }
    let mut contents = stanzas.join("\n\n");
    contents.push_str("\n\n");
    contents
}

fn render_stanza(entry: &PackageMetadata, artifact_md5: Option<&str>) -> String {
    let description = rendered_description(entry);
    let description_md5 = hex::encode(Md5::digest(format!("{description}\n")));

    let mut fields: Vec<(&str, String)> = vec![
        ("Package", entry.name.clone()),
        ("Version", entry.version.clone()),
        ("Architecture", entry.architecture.clone()),
    ];
    let control_fields = [
        ("Maintainer", entry.maintainer.clone()),
        ("Multi-Arch", entry.multi_arch.clone()),
        ("Homepage", entry.homepage.clone()),
        ("Section", entry.section.clone()),
        ("Priority", entry.priority.clone()),
        ("Pre-Depends", entry.pre_depends.clone()),
        ("Depends", entry.depends.clone()),
        ("Suggests", entry.suggests.clone()),
        ("Conflicts", entry.conflicts.clone()),
        ("Breaks", entry.breaks.clone()),
        ("Replaces", entry.replaces.clone()),
        ("Provides", entry.provides.clone()),
        ("Installed-Size", entry.installed_size.map(|s| s.to_string())),
    ];
    for (name, value) in control_fields {
        if let Some(value) = value {
            fields.push((name, value));
        }
    }
    fields.push(("Filename", pool_filename(entry)));
    fields.push(("Size", entry.size.to_string()));
    fields.push(("SHA256", entry.sha256.clone()));
    if let Some(md5) = artifact_md5 {
        fields.push(("MD5sum", md5.to_string()));
    }
    fields.push(("Description", description));
    fields.push(("Description-md5", description_md5));

    let mut stanza = String::new();
    for (name, value) in fields {
        if !stanza.is_empty() {
            stanza.push('\n');
        }
        write!(stanza, "{name}: {value}").unwrap();
    }
    stanza
}

/// `pool/<dist>/<component>/<arch>/<name>_<version>_<arch>.deb`, relative to
/// the repo base the apt client was pointed at.
pub fn pool_filename(entry: &PackageMetadata) -> String {
    format!(
        "pool/{}/{}/{}/{}_{}_{}.deb",
        entry.distribution,
        entry.component,
        entry.architecture,
        entry.name,
        entry.version,
        entry.architecture
    )
}

/// The description as emitted: stored first line, continuation lines
/// normalized to exactly one leading space. Packages without a stored
/// description fall back to `<name> <version>`.
fn rendered_description(entry: &PackageMetadata) -> String {
    let stored = entry
        .description
        .clone()
        .unwrap_or_else(|| format!("{} {}", entry.name, entry.version));
    let mut lines = stored.lines();
    let first = lines.next().unwrap_or_default().to_string();
    lines.fold(first, |mut acc, line| {
        acc.push_str("\n ");
        acc.push_str(line.trim_start());
        acc
    })
}
