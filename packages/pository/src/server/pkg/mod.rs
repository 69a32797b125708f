pub mod delete;
pub mod download;
pub mod info;
pub mod list;
pub mod upload;

use crate::{api::ErrorResponse, storage::sanitize_path};

/// Sanitize one location component from the request; empty after sanitizing
/// is a validation failure.
pub(crate) fn sanitized(value: &str, what: &str) -> Result<String, ErrorResponse> {
    let cleaned = sanitize_path(value);
    if cleaned.is_empty() {
        return Err(ErrorResponse::validation(format!(
            "{what} must not be empty"
        )));
    }
    Ok(cleaned)
}

/// Decode `<name>_<version>[_<arch>].deb`.
pub(crate) fn parse_deb_filename(filename: &str) -> Option<(String, String, Option<String>)> {
    let stem = filename.strip_suffix(".deb")?;
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.as_slice() {
        [name, version] if !name.is_empty() && !version.is_empty() => {
            Some((name.to_string(), version.to_string(), None))
        }
        [name, version, arch] if !name.is_empty() && !version.is_empty() && !arch.is_empty() => {
            Some((
                name.to_string(),
                version.to_string(),
                Some(arch.to_string()),
            ))
        }
        _ => None,
    }
}
