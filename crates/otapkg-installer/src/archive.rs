//! Archive container handling: gzip-compressed tarballs holding the
//! suite's files and its manifest.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use thiserror::Error;

use otapkg_core::manifest::{parse_manifest, ManifestError};
use otapkg_core::properties::PropertySet;

/// Path of the manifest inside every archive.
pub const MANIFEST_PATH: &str = "manifest.mf";

/// Errors reading or writing an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive could not be read or decompressed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The archive has no manifest entry.
    #[error("archive has no '{MANIFEST_PATH}' entry")]
    MissingManifest,
    /// The manifest entry is malformed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// The manifest entry is not valid UTF-8.
    #[error("manifest is not valid UTF-8")]
    ManifestEncoding,
}

/// Read and parse the manifest entry of the archive at `path`.
///
/// # Errors
///
/// Returns [`ArchiveError`] when the archive cannot be read, has no
/// manifest, or the manifest does not parse.
pub fn read_manifest(path: &Path) -> Result<PropertySet, ArchiveError> {
    let file = File::open(path)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == MANIFEST_PATH {
            let mut raw = Vec::new();
            entry.read_to_end(&mut raw)?;
            let text = String::from_utf8(raw).map_err(|_| ArchiveError::ManifestEncoding)?;
            return Ok(parse_manifest(&text)?);
        }
    }
    Err(ArchiveError::MissingManifest)
}

/// The normalized paths of every file entry in the archive.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] when the archive cannot be read.
pub fn entry_paths(path: &Path) -> Result<HashSet<String>, ArchiveError> {
    let file = File::open(path)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut paths = HashSet::new();
    for entry in tar.entries()? {
        let entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        debug!("archive entry: {path}");
        paths.insert(path);
    }
    Ok(paths)
}

/// Write a gzip-compressed tarball containing the given (path, bytes)
/// entries.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] on any write failure.
pub fn write_archive(dest: &Path, entries: &[(&str, &[u8])]) -> Result<(), ArchiveError> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *bytes)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn manifest_and_entries_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("suite.pkg");
        write_archive(
            &path,
            &[
                (MANIFEST_PATH, b"Suite-Name: Chess\n".as_slice()),
                ("bin/chess", b"\0\0\0\0".as_slice()),
            ],
        )
        .unwrap();

        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.get("Suite-Name"), Some("Chess"));

        let paths = entry_paths(&path).unwrap();
        assert!(paths.contains("bin/chess"));
        assert!(paths.contains(MANIFEST_PATH));
    }

    #[test]
    fn archive_without_manifest_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.pkg");
        write_archive(&path, &[("bin/x", b"x".as_slice())]).unwrap();
        assert!(matches!(
            read_manifest(&path),
            Err(ArchiveError::MissingManifest)
        ));
    }
}
