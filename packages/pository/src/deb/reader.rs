//! Outer `.deb` archive walking and control tarball extraction.

use std::io::{Cursor, Read};

use super::{ControlFields, DebError, DebInfo};

/// Validate a complete `.deb` and extract its control paragraph.
///
/// Validation requires all three canonical members. Control extraction is
/// deferred (the `control` field comes back `None`) when the control tarball
/// cannot be decoded; a decode failure is not an upload failure.
pub fn parse(data: &[u8]) -> Result<DebInfo, DebError> {
    let mut archive = ar::Archive::new(Cursor::new(data));

    let mut deb_version: Option<String> = None;
    let mut control_member: Option<(String, Vec<u8>)> = None;
    let mut saw_data_member = false;

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(|_| DebError::InvalidArchive)?;
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
        if name == "debian-binary" {
            let mut raw = String::new();
            entry
                .read_to_string(&mut raw)
                .map_err(|_| DebError::InvalidArchive)?;
            deb_version = Some(raw.trim().to_string());
        } else if let Some(extension) = name.strip_prefix("control.tar") {
            let mut raw = Vec::new();
            entry
                .read_to_end(&mut raw)
                .map_err(|_| DebError::InvalidArchive)?;
            control_member = Some((extension.to_string(), raw));
        } else if name.starts_with("data.tar") {
            saw_data_member = true;
        }
        // Unknown members (e.g. `_gpgorigin`) are skipped; the ar reader
        // advances past unread entry bodies on the next iteration.
    }

    let deb_version = deb_version.ok_or(DebError::NotDebianPackage("missing debian-binary"))?;
    let (extension, control_tarball) =
        control_member.ok_or(DebError::NotDebianPackage("missing control.tar member"))?;
    if !saw_data_member {
        return Err(DebError::NotDebianPackage("missing data.tar member"));
    }
    if !deb_version.starts_with("2.") {
        return Err(DebError::UnsupportedFormat(deb_version));
    }

    let control = decompress(&extension, &control_tarball)
        .and_then(|tarball| read_control_paragraph(&tarball))
        .map(|paragraph| ControlFields::from_paragraph(&paragraph));

    Ok(DebInfo {
        deb_version,
        control,
    })
}

fn decompress(extension: &str, data: &[u8]) -> Option<Vec<u8>> {
    let mut reader: Box<dyn Read> = match extension {
        "" => Box::new(Cursor::new(data)),
        ".gz" => Box::new(flate2::read::GzDecoder::new(Cursor::new(data))),
        ".xz" => Box::new(xz2::read::XzDecoder::new(Cursor::new(data))),
        ".zst" => Box::new(zstd::stream::read::Decoder::new(Cursor::new(data)).ok()?),
        _ => return None,
    };
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok()?;
    Some(out)
}

/// Locate `control` (or `./control`) in the ustar archive and return its
/// payload.
fn read_control_paragraph(tarball: &[u8]) -> Option<String> {
    let mut archive = tar::Archive::new(Cursor::new(tarball));
    for entry in archive.entries().ok()? {
        let mut entry = entry.ok()?;
        let path = entry.path().ok()?;
        let name = path.to_string_lossy();
        if name == "control" || name == "./control" {
            let mut paragraph = String::new();
            entry.read_to_string(&mut paragraph).ok()?;
            return Some(paragraph);
        }
    }
    None
}
