//! RFC-822-style control paragraph parsing.

use serde::{Deserialize, Serialize};

/// The control fields Pository records. Anything else in the paragraph is
/// dropped here, at the parse boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlFields {
    pub package: Option<String>,
    pub version: Option<String>,
    pub architecture: Option<String>,
    /// Multiline; continuation lines are stored newline-separated without
    /// their leading whitespace.
    pub description: Option<String>,
    pub multi_arch: Option<String>,
    pub maintainer: Option<String>,
    pub depends: Option<String>,
    pub pre_depends: Option<String>,
    pub suggests: Option<String>,
    pub conflicts: Option<String>,
    pub breaks: Option<String>,
    pub replaces: Option<String>,
    pub provides: Option<String>,
    pub homepage: Option<String>,
    pub section: Option<String>,
    pub priority: Option<String>,
    /// Kibibytes, as declared by the package itself.
    pub installed_size: Option<u64>,
}

impl ControlFields {
    /// Parse a control paragraph. Lines starting with space or tab continue
    /// the previous field; field names match case-insensitively.
    pub fn from_paragraph(paragraph: &str) -> Self {
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in paragraph.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = fields.last_mut() {
                    value.push('\n');
                    value.push_str(line.trim_start());
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            fields.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut out = Self::default();
        for (name, value) in fields {
            if value.is_empty() {
                continue;
            }
            match name.to_ascii_lowercase().as_str() {
                "package" => out.package = Some(value),
                "version" => out.version = Some(value),
                "architecture" => out.architecture = Some(value),
                "description" => out.description = Some(value),
                "multi-arch" => out.multi_arch = Some(value),
                "maintainer" => out.maintainer = Some(value),
                "depends" => out.depends = Some(value),
                "pre-depends" => out.pre_depends = Some(value),
                "suggests" => out.suggests = Some(value),
                "conflicts" => out.conflicts = Some(value),
                "breaks" => out.breaks = Some(value),
                "replaces" => out.replaces = Some(value),
                "provides" => out.provides = Some(value),
                "homepage" => out.homepage = Some(value),
                "section" => out.section = Some(value),
                "priority" => out.priority = Some(value),
                "installed-size" => out.installed_size = value.parse().ok(),
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn parses_simple_paragraph() {
        let fields = ControlFields::from_paragraph(indoc! {"
            Package: hello
            Version: 1.0-1
            Architecture: amd64
            Maintainer: Jane Doe <jane@example.com>
            Installed-Size: 123
            Depends: libc6 (>= 2.34)
            Description: example package
        "});
        assert_eq!(fields.package.as_deref(), Some("hello"));
        assert_eq!(fields.version.as_deref(), Some("1.0-1"));
        assert_eq!(fields.architecture.as_deref(), Some("amd64"));
        assert_eq!(fields.installed_size, Some(123));
        assert_eq!(fields.depends.as_deref(), Some("libc6 (>= 2.34)"));
        assert_eq!(fields.description.as_deref(), Some("example package"));
    }

    #[test]
    fn continuation_lines_join_the_previous_field() {
        let fields = ControlFields::from_paragraph(indoc! {"
            Package: hello
            Description: first line
             second line
             .
             fourth line
        "});
        assert_eq!(
            fields.description.as_deref(),
            Some("first line\nsecond line\n.\nfourth line")
        );
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let fields = ControlFields::from_paragraph(indoc! {"
            Package: hello
            Original-Maintainer: Someone Else <e@example.com>
            Bugs: https://bugs.example.com
        "});
        assert_eq!(fields.package.as_deref(), Some("hello"));
        assert_eq!(fields.maintainer, None);
    }

    #[test]
    fn field_names_match_case_insensitively() {
        let fields = ControlFields::from_paragraph("PACKAGE: hello\nmulti-ARCH: foreign\n");
        assert_eq!(fields.package.as_deref(), Some("hello"));
        assert_eq!(fields.multi_arch.as_deref(), Some("foreign"));
    }

    #[test]
    fn unparseable_installed_size_is_absent() {
        let fields = ControlFields::from_paragraph("Installed-Size: lots\n");
        assert_eq!(fields.installed_size, None);
    }

    #[test]
    fn empty_values_are_absent() {
        let fields = ControlFields::from_paragraph("Package: hello\nHomepage:\n");
        assert_eq!(fields.homepage, None);
    }
}
