//! Path-component sanitizing and location validators.
//!
//! Every component of a package location passes through `sanitize_path`
//! before it is used to build a filesystem path.

use lazy_regex::{lazy_regex, regex_is_match};

/// Debian architecture tags accepted without pattern matching.
pub const KNOWN_ARCHITECTURES: &[&str] = &[
    "all", "amd64", "arm64", "armel", "armhf", "i386", "mips64el", "mipsel", "ppc64el", "riscv64",
    "s390x",
];

/// Strip path separators, collapse `..` runs and drop leading dots. The
/// result never contains a separator or a traversal segment; it may be
/// empty, which callers must reject.
pub fn sanitize_path(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .filter(|c| *c != '/' && *c != '\\')
        .collect::<String>()
        .trim()
        .to_string();
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    out.trim_start_matches('.').to_string()
}

pub fn is_valid_package_name(name: &str) -> bool {
    regex_is_match!(r"^(?i)[a-z0-9][a-z0-9+.-]*$", name)
}

pub fn is_valid_version(version: &str) -> bool {
    regex_is_match!(r"^(?i)[a-z0-9][a-z0-9.+~:-]*$", version)
}

pub fn is_valid_architecture(architecture: &str) -> bool {
    KNOWN_ARCHITECTURES.contains(&architecture)
        || lazy_regex!(r"^[a-z][a-z0-9-]*$").is_match(architecture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_path("a/b\\c"), "abc");
        assert_eq!(sanitize_path("stable"), "stable");
    }

    #[test]
    fn sanitize_defeats_traversal() {
        assert_eq!(sanitize_path("../../etc"), "etc");
        assert_eq!(sanitize_path("..\\..\\windows"), "windows");
        assert_eq!(sanitize_path("...."), "");
        assert_eq!(sanitize_path(".hidden"), "hidden");
        assert!(!sanitize_path("a..b..c").contains(".."));
    }

    #[test]
    fn sanitize_can_empty_out() {
        assert_eq!(sanitize_path("//"), "");
        assert_eq!(sanitize_path("."), "");
        assert_eq!(sanitize_path(""), "");
    }

    #[test]
    fn package_names() {
        assert!(is_valid_package_name("hello"));
        assert!(is_valid_package_name("libc++6"));
        assert!(is_valid_package_name("Hello"));
        assert!(is_valid_package_name("g++-12"));
        assert!(!is_valid_package_name(""));
        assert!(!is_valid_package_name("+hello"));
        assert!(!is_valid_package_name("he llo"));
        assert!(!is_valid_package_name("hello_world"));
    }

    #[test]
    fn versions() {
        assert!(is_valid_version("1.0"));
        assert!(is_valid_version("2:1.0-1ubuntu3~bpo1"));
        assert!(!is_valid_version(""));
        assert!(!is_valid_version("-1"));
        assert!(!is_valid_version("1 0"));
    }

    #[test]
    fn architectures() {
        assert!(is_valid_architecture("amd64"));
        assert!(is_valid_architecture("all"));
        assert!(is_valid_architecture("loong64"));
        assert!(!is_valid_architecture("AMD64"));
        assert!(!is_valid_architecture("64bit"));
        assert!(!is_valid_architecture(""));
    }
}
