// src/reader.rs

//! CSAR package reader
//!
//! Composes the full validation pipeline: locate the source, extract the
//! ZIP, resolve metadata, resolve external references, validate artifacts.
//! The pipeline runs on construction; a successfully built [`CsarReader`]
//! is a validated archive.
//!
//! The reader owns its scratch file (for remote sources) and extracted
//! scratch directory. Both live exactly as long as the reader and are
//! removed on drop, on every exit path, including mid-pipeline errors
//! where the partially built guards go out of scope.

use crate::artifact::{self, ArtifactDescriptor, MimeTable};
use crate::error::{Error, Result};
use crate::extract::extract_archive;
use crate::fetch::fetch_source;
use crate::meta::{resolve_metadata, MetadataRecord};
use crate::refs::validate_references;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

/// Default timeout for network operations (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options controlling reader validation behavior
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Reject unknown metadata keys instead of ignoring them
    pub strict_metadata_keys: bool,
    /// Bounded timeout for remote fetches and URL reachability probes
    pub timeout: Duration,
    /// MIME table used for advisory content-type checks
    pub mime_table: MimeTable,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            strict_metadata_keys: false,
            timeout: DEFAULT_TIMEOUT,
            mime_table: MimeTable::default(),
        }
    }
}

/// Non-fatal findings accumulated while validating an archive
#[derive(Debug, Default)]
pub struct ValidationReport {
    warnings: Vec<String>,
}

impl ValidationReport {
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A validated CSAR archive
#[derive(Debug)]
pub struct CsarReader {
    source: String,
    record: MetadataRecord,
    artifacts: Vec<ArtifactDescriptor>,
    report: ValidationReport,
    /// Extracted archive tree; removed on drop
    root: TempDir,
    /// Download scratch file for remote sources; removed on drop
    _scratch: Option<NamedTempFile>,
}

impl CsarReader {
    /// Open and validate a local CSAR file
    pub fn open(source: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(
            &source.as_ref().to_string_lossy(),
            false,
            ReaderOptions::default(),
        )
    }

    /// Fetch, open, and validate a remote CSAR package
    pub fn open_remote(source: &str) -> Result<Self> {
        Self::open_with(source, true, ReaderOptions::default())
    }

    /// Open with explicit source kind and options
    pub fn open_with(source: &str, remote: bool, options: ReaderOptions) -> Result<Self> {
        debug!(source, remote, "opening CSAR package");

        let located = fetch_source(source, remote, options.timeout)?;
        let root = extract_archive(&located.path)?;

        let resolved = resolve_metadata(root.path(), options.strict_metadata_keys)?;
        let entry = resolved.record.entry_definitions().to_string();
        let entry_path = root.path().join(&entry);
        if !entry_path.is_file() {
            return Err(Error::InvalidMetadata(format!(
                "entry definitions \"{entry}\" does not exist in the archive"
            )));
        }

        let template = load_template(&entry_path, &entry)?;
        let mut warnings = Vec::new();
        validate_references(
            root.path(),
            &entry,
            &template,
            options.timeout,
            &mut warnings,
        )?;
        artifact::validate_artifacts(
            root.path(),
            &resolved.artifacts,
            &options.mime_table,
            &mut warnings,
        )?;

        debug!(
            source,
            warnings = warnings.len(),
            artifacts = resolved.artifacts.len(),
            "CSAR package validated"
        );

        Ok(Self {
            source: source.to_string(),
            record: resolved.record,
            artifacts: resolved.artifacts,
            report: ValidationReport { warnings },
            root,
            _scratch: located.scratch,
        })
    }

    /// Original source string (path or URL)
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The validated metadata record
    pub fn metadata(&self) -> &MetadataRecord {
        &self.record
    }

    /// Artifacts declared in the metadata
    pub fn artifacts(&self) -> &[ArtifactDescriptor] {
        &self.artifacts
    }

    /// Package author
    pub fn author(&self) -> &str {
        self.record.author()
    }

    /// Archive (or template) version
    pub fn version(&self) -> &str {
        self.record.version()
    }

    /// Metadata file version, when file-based metadata applies
    pub fn metadata_file_version(&self) -> Option<&str> {
        self.record.metadata_file_version()
    }

    /// Template name, when inline metadata applies
    pub fn template_name(&self) -> Option<&str> {
        self.record.template_name()
    }

    /// Relative path of the entry definitions template
    pub fn entry_definitions(&self) -> &str {
        self.record.entry_definitions()
    }

    /// Parsed entry definitions document, for the downstream TOSCA
    /// processor
    pub fn entry_definitions_yaml(&self) -> Result<Value> {
        let path = self.root.path().join(self.entry_definitions());
        load_template(&path, self.entry_definitions())
    }

    /// Template description, if the entry document declares one
    pub fn description(&self) -> Option<String> {
        let template = self.entry_definitions_yaml().ok()?;
        template
            .get("description")
            .and_then(|d| d.as_str())
            .map(String::from)
    }

    /// Root of the extracted archive tree. Valid only while the reader is
    /// alive.
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Additional definition search directories to hand to a TOSCA
    /// processor alongside the entry template.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        ["definitions", "Definitions"]
            .iter()
            .map(|dir| self.root.path().join(dir))
            .filter(|path| path.is_dir())
            .collect()
    }

    /// Non-fatal findings from validation
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }
}

fn load_template(path: &Path, label: &str) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::InvalidMetadata(format!("{label} is not valid YAML: {e}")))?;
    if !matches!(value, Value::Mapping(_)) {
        return Err(Error::InvalidMetadata(format!(
            "{label} does not contain a YAML mapping"
        )));
    }
    Ok(value)
}
