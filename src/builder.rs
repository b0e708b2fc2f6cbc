// src/builder.rs

//! CSAR package builder
//!
//! Packages a source directory (or an existing ZIP) into a CSAR: compress,
//! inject the file-based metadata record at the fixed metadata path, copy
//! to the output location, then re-run the full reader pipeline over the
//! output. A builder never produces an archive its own reader would
//! reject, and it surfaces the reader's error unchanged when validation
//! fails.

use crate::error::{Error, Result};
use crate::meta::{MetadataRecord, META_FILE};
use crate::reader::{CsarReader, ReaderOptions};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Builds CSAR v1.1 packages
pub struct CsarBuilder {
    source: PathBuf,
    output: PathBuf,
    entry: String,
    author: String,
    options: ReaderOptions,
}

impl CsarBuilder {
    /// Create a builder for `source` (a directory or an existing ZIP
    /// file), writing the finished archive to `output`.
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            entry: "service.yaml".to_string(),
            author: "TOSCA".to_string(),
            options: ReaderOptions::default(),
        }
    }

    /// Relative path of the entry definitions template inside the archive
    pub fn entry(mut self, entry: &str) -> Self {
        self.entry = entry.to_string();
        self
    }

    /// Package author written to the metadata record
    pub fn author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    /// Options for the self-validation pass
    pub fn reader_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the archive and validate it by constructing a reader over the
    /// output. Validation errors propagate unchanged.
    pub fn build(self) -> Result<CsarReader> {
        if !self.source.exists() {
            return Err(Error::NotFound(self.source.clone()));
        }

        let scratch = tempfile::Builder::new().suffix(".csar.zip").tempfile()?;
        if self.source.is_dir() {
            debug!(source = %self.source.display(), "compressing source directory");
            zip_directory(&self.source, scratch.path())?;
        } else {
            debug!(source = %self.source.display(), "copying existing ZIP source");
            fs::copy(&self.source, scratch.path())?;
        }

        let record = MetadataRecord::file_based(&self.author, &self.entry);
        append_metadata(scratch.path(), &record)?;

        fs::copy(scratch.path(), &self.output)?;
        drop(scratch);
        debug!(output = %self.output.display(), "archive written, self-validating");

        match CsarReader::open_with(&self.output.to_string_lossy(), false, self.options) {
            Ok(reader) => Ok(reader),
            Err(e) => {
                // never leave an archive behind that our own reader rejects
                let _ = fs::remove_file(&self.output);
                Err(e)
            }
        }
    }
}

/// Compress every file under `source` into a fresh ZIP, preserving
/// relative paths.
fn zip_directory(source: &Path, target: &Path) -> Result<()> {
    let file = File::create(target)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::InvalidArgument(format!("path outside source tree: {e}")))?;
        // ZIP entry names always use forward slashes
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        debug!(entry = %name, "writing archive entry");
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| Error::InvalidFormat(format!("failed to write entry {name}: {e}")))?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut writer)?;
    }

    writer
        .finish()
        .map_err(|e| Error::InvalidFormat(format!("failed to finish archive: {e}")))?;
    Ok(())
}

/// Append the metadata record to an existing ZIP at the fixed metadata
/// path.
fn append_metadata(archive: &Path, record: &MetadataRecord) -> Result<()> {
    let file = OpenOptions::new().read(true).write(true).open(archive)?;
    let mut writer = ZipWriter::new_append(file).map_err(|e| {
        Error::InvalidFormat(format!(
            "{} is not a valid ZIP file: {e}",
            archive.display()
        ))
    })?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(META_FILE, options)
        .map_err(|e| Error::InvalidFormat(format!("failed to write metadata entry: {e}")))?;
    io::Write::write_all(&mut writer, record.to_meta_yaml()?.as_bytes())?;
    writer
        .finish()
        .map_err(|e| Error::InvalidFormat(format!("failed to finish archive: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn output_path(dir: &Path) -> PathBuf {
        dir.join("build.csar.zip")
    }

    fn hello_world_source(dir: &Path) -> PathBuf {
        let source = dir.join("hello_world");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("service.yaml"), "imports: []\n").unwrap();
        source
    }

    #[test]
    fn build_from_directory_and_read_back() {
        let dir = TempDir::new().unwrap();
        let source = hello_world_source(dir.path());
        let output = output_path(dir.path());

        let reader = CsarBuilder::new(&source, &output)
            .entry("service.yaml")
            .author("Example")
            .build()
            .unwrap();

        assert_eq!(reader.author(), "Example");
        assert_eq!(reader.version(), "1.1");
        assert_eq!(reader.entry_definitions(), "service.yaml");
        assert!(reader.artifacts().is_empty());
        assert!(output.is_file());
    }

    #[test]
    fn build_preserves_nested_paths() {
        let dir = TempDir::new().unwrap();
        let source = hello_world_source(dir.path());
        fs::create_dir_all(source.join("scripts")).unwrap();
        fs::write(source.join("scripts/install.sh"), "#!/bin/sh\n").unwrap();
        fs::write(
            source.join("service.yaml"),
            "topology_template:\n  node_templates:\n    web:\n      artifacts:\n        install: scripts/install.sh\n",
        )
        .unwrap();
        let output = output_path(dir.path());

        let reader = CsarBuilder::new(&source, &output)
            .entry("service.yaml")
            .author("Example")
            .build()
            .unwrap();
        assert!(reader.path().join("scripts/install.sh").is_file());
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = CsarBuilder::new(dir.path().join("absent"), output_path(dir.path()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn self_validation_error_propagates_unchanged() {
        let dir = TempDir::new().unwrap();
        let source = hello_world_source(dir.path());
        let output = output_path(dir.path());

        // entry points at a file the archive does not contain
        let err = CsarBuilder::new(&source, &output)
            .entry("missing.yaml")
            .author("Example")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn failed_build_removes_its_output() {
        let dir = TempDir::new().unwrap();
        let source = hello_world_source(dir.path());
        let output = output_path(dir.path());

        CsarBuilder::new(&source, &output)
            .entry("missing.yaml")
            .author("Example")
            .build()
            .unwrap_err();
        assert!(!output.exists());
    }

    #[test]
    fn build_from_existing_zip_injects_metadata() {
        let dir = TempDir::new().unwrap();
        let source = hello_world_source(dir.path());

        // first produce a plain ZIP without metadata
        let plain_zip = dir.path().join("plain.zip");
        zip_directory(&source, &plain_zip).unwrap();

        let output = output_path(dir.path());
        let reader = CsarBuilder::new(&plain_zip, &output)
            .entry("service.yaml")
            .author("Example")
            .build()
            .unwrap();
        assert_eq!(reader.author(), "Example");
        assert!(reader.path().join(META_FILE).is_file());
    }

    #[test]
    fn non_zip_file_source_fails_format_validation() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("notazip.zip");
        fs::write(&bogus, "plain text").unwrap();

        let err = CsarBuilder::new(&bogus, output_path(dir.path()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
