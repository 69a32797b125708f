//! Debian binary package decoding.
//!
//! A `.deb` is an ar archive with three members: `debian-binary` (format
//! version), `control.tar[.gz|.xz|.zst]` (package metadata) and
//! `data.tar[.<ext>]` (file contents). Upload validation walks the outer
//! archive and, when a decoder for the control tarball's compression is at
//! hand, extracts the control paragraph in-process. When it is not, the
//! stored artifact can still be enriched later through `dpkg-deb`.

mod control;
mod reader;

use std::{path::Path, time::Duration};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub use control::ControlFields;
pub use reader::parse;

/// Bound on a single `dpkg-deb --field` invocation.
const DPKG_DEB_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum DebError {
    #[error("invalid ar archive")]
    InvalidArchive,
    #[error("not a Debian package: {0}")]
    NotDebianPackage(&'static str),
    #[error("unsupported Debian package format: {0}")]
    UnsupportedFormat(String),
}

/// Result of validating a package upload.
#[derive(Debug, Clone)]
pub struct DebInfo {
    /// Contents of `debian-binary`, e.g. `2.0`.
    pub deb_version: String,
    /// Control fields, when the control tarball could be decoded.
    pub control: Option<ControlFields>,
}

/// Fallback extraction for artifacts whose control tarball could not be
/// decoded at upload time. Best-effort: any failure yields `None`.
pub async fn extract_with_dpkg(path: &Path) -> Option<ControlFields> {
    let run = Command::new("dpkg-deb").arg("--field").arg(path).output();
    let output = match tokio::time::timeout(DPKG_DEB_TIMEOUT, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            debug!(path = %path.display(), %err, "dpkg-deb invocation failed");
            return None;
        }
        Err(_elapsed) => {
            debug!(path = %path.display(), "dpkg-deb timed out");
            return None;
        }
    };
    if !output.status.success() {
        debug!(path = %path.display(), status = ?output.status, "dpkg-deb exited non-zero");
        return None;
    }
    let paragraph = String::from_utf8_lossy(&output.stdout);
    Some(ControlFields::from_paragraph(&paragraph))
}
