//! `Release` document rendering.

use std::{
    collections::BTreeSet,
    fmt::Write as _,
    io::Write as _,
};

use tabwriter::{Alignment, TabWriter};
use time::{OffsetDateTime, format_description::well_known::Rfc2822};

use super::PackagesIndex;

#[derive(Debug)]
pub struct ReleaseFile {
    pub contents: String,
}

impl ReleaseFile {
    /// Render the Release document for one distribution. `architectures` and
    /// `components` are the full sets advertised (amd64 is always present in
    /// the former); `indexes` are the non-empty `(component, arch)` slices.
    ///
    /// The date format is RFC 2822, which renders the RFC 1123 dates apt
    /// expects; 5322/2822/1123 are mutually compatible here.
    pub fn from_indexes(
        repo: &str,
        distribution: &str,
        release_ts: OffsetDateTime,
        architectures: &BTreeSet<String>,
        components: &BTreeSet<String>,
        indexes: &[PackagesIndex],
    ) -> Self {
        let date = release_ts
            .format(&Rfc2822)
            .expect("UTC timestamps always format");

        let mut contents = String::new();
        for (name, value) in [
            ("Origin", String::from("Pository")),
            ("Label", String::from("Pository")),
            ("Suite", distribution.to_string()),
            ("Codename", format!("pository-{repo}-{distribution}")),
            ("Date", date),
            (
                "Architectures",
                architectures.iter().cloned().collect::<Vec<_>>().join(" "),
            ),
            (
                "Components",
                components.iter().cloned().collect::<Vec<_>>().join(" "),
            ),
            ("Description", format!("Pository repository for {repo}")),
        ] {
            writeln!(contents, "{name}: {value}").unwrap();
        }

        contents += "MD5Sum:\n";
        contents += &hash_block(indexes, |index| &index.md5sum);
        contents += "SHA256:\n";
        contents += &hash_block(indexes, |index| &index.sha256sum);

        Self { contents }
    }
}

/// One aligned ` <hash> <size> <component>/binary-<arch>/Packages` line per
/// index.
fn hash_block<'a>(
    indexes: &'a [PackagesIndex],
    hash: impl Fn(&'a PackagesIndex) -> &'a str,
) -> String {
    let mut writer = TabWriter::new(vec![]).alignment(Alignment::Right).padding(1);
    for index in indexes {
        writeln!(
            &mut writer,
            " {}\t{}\t{}/binary-{}/Packages",
            hash(index),
            index.size,
            index.component,
            index.architecture
        )
        .unwrap();
    }
    writer.flush().unwrap();
    String::from_utf8(writer.into_inner().unwrap()).unwrap()
}
