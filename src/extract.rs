// src/extract.rs

//! ZIP container extraction
//!
//! Unpacks a CSAR archive into a scratch directory. Entries carrying `..`
//! segments or absolute names would escape the target directory; those
//! archives are rejected outright.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;
use zip::ZipArchive;

/// Validate the ZIP structure of `archive` and extract it into a fresh
/// scratch directory. The returned [`TempDir`] owns the extracted tree and
/// removes it on drop.
pub fn extract_archive(archive: &Path) -> Result<TempDir> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        Error::InvalidFormat(format!("{} is not a valid ZIP file: {e}", archive.display()))
    })?;

    let target = TempDir::new()?;
    debug!(
        entries = zip.len(),
        target = %target.path().display(),
        "extracting archive"
    );

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::InvalidFormat(format!("unreadable ZIP entry {i}: {e}")))?;

        // enclosed_name() is None for traversal or absolute entry names
        let relative = entry.enclosed_name().ok_or_else(|| {
            Error::InvalidFormat(format!(
                "ZIP entry \"{}\" escapes the extraction directory",
                entry.name()
            ))
        })?;
        let destination = target.path().join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        io::copy(&mut entry, &mut out)?;
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = ZipWriter::new(file.reopen().unwrap());
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    #[test]
    fn extracts_nested_entries() {
        let zip = write_zip(&[
            ("service.yaml", b"tosca_definitions_version: 1.1"),
            ("scripts/install.sh", b"#!/bin/sh"),
        ]);

        let root = extract_archive(zip.path()).unwrap();
        assert!(root.path().join("service.yaml").is_file());
        assert!(root.path().join("scripts/install.sh").is_file());
    }

    #[test]
    fn rejects_non_zip_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"plain text, not a zip").unwrap();

        let err = extract_archive(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn rejects_path_traversal_entries() {
        let zip = write_zip(&[("../escape.sh", b"#!/bin/sh")]);

        let err = extract_archive(zip.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn scratch_directory_removed_on_drop() {
        let zip = write_zip(&[("service.yaml", b"{}")]);
        let root = extract_archive(zip.path()).unwrap();
        let path = root.path().to_path_buf();
        assert!(path.is_dir());
        drop(root);
        assert!(!path.exists());
    }

}
