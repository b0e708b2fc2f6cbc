// src/meta.rs

//! CSAR metadata resolution
//!
//! A CSAR package declares its metadata in one of two shapes. If the
//! archive carries a file at the fixed path `TOSCA-Metadata/TOSCA.meta`,
//! the record is file-based; otherwise the single root-level template must
//! embed a `metadata` section (inline shape). The shape is decided once by
//! a presence check and carried as a tagged variant, so consumers never
//! re-probe key presence.

use crate::artifact::{ArtifactDescriptor, ArtifactSignature};
use crate::error::{Error, Result};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fixed in-archive path of the metadata file
pub const META_FILE: &str = "TOSCA-Metadata/TOSCA.meta";

/// File-based metadata keys
pub const META_FILE_VERSION_KEY: &str = "TOSCA-Meta-File-Version";
pub const META_CSAR_VERSION_KEY: &str = "CSAR-Version";
pub const META_CREATED_BY_KEY: &str = "Created-By";
pub const META_ENTRY_DEFINITIONS_KEY: &str = "Entry-Definitions";

/// Inline metadata keys
pub const META_TMPL_NAME_KEY: &str = "template_name";
pub const META_TMPL_AUTHOR_KEY: &str = "template_author";
pub const META_TMPL_VERSION_KEY: &str = "template_version";

/// Artifact descriptor mapping key (valid in either shape)
pub const META_ARTIFACTS_KEY: &str = "artifacts";

/// Required metadata file version
pub const META_FILE_VERSION: &str = "1.0";
/// Required archive version
pub const CSAR_VERSION: &str = "1.1";
/// Required inline template version
pub const TEMPLATE_VERSION: &str = "1.1";

/// Validated CSAR metadata, carrying only the fields valid for its shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRecord {
    /// Dedicated `TOSCA-Metadata/TOSCA.meta` file
    FileBased {
        file_version: String,
        csar_version: String,
        created_by: String,
        entry_definitions: String,
    },
    /// `metadata` section embedded in the single root template
    Inline {
        template_version: String,
        template_author: String,
        template_name: String,
        /// Implicit entry point: the root template itself
        entry: String,
    },
}

impl MetadataRecord {
    /// Build the file-based record the archive builder writes
    pub fn file_based(author: &str, entry: &str) -> Self {
        Self::FileBased {
            file_version: META_FILE_VERSION.to_string(),
            csar_version: CSAR_VERSION.to_string(),
            created_by: author.to_string(),
            entry_definitions: entry.to_string(),
        }
    }

    /// Package author
    pub fn author(&self) -> &str {
        match self {
            Self::FileBased { created_by, .. } => created_by,
            Self::Inline {
                template_author, ..
            } => template_author,
        }
    }

    /// Archive (or template) version
    pub fn version(&self) -> &str {
        match self {
            Self::FileBased { csar_version, .. } => csar_version,
            Self::Inline {
                template_version, ..
            } => template_version,
        }
    }

    /// Metadata file version, for the file-based shape
    pub fn metadata_file_version(&self) -> Option<&str> {
        match self {
            Self::FileBased { file_version, .. } => Some(file_version),
            Self::Inline { .. } => None,
        }
    }

    /// Template name, for the inline shape
    pub fn template_name(&self) -> Option<&str> {
        match self {
            Self::FileBased { .. } => None,
            Self::Inline { template_name, .. } => Some(template_name),
        }
    }

    /// Relative path of the entry definitions template
    pub fn entry_definitions(&self) -> &str {
        match self {
            Self::FileBased {
                entry_definitions, ..
            } => entry_definitions,
            Self::Inline { entry, .. } => entry,
        }
    }

    /// Serialize a file-based record to the YAML document written at
    /// [`META_FILE`]. Inline records are embedded in the template and are
    /// never written standalone.
    pub fn to_meta_yaml(&self) -> Result<String> {
        match self {
            Self::FileBased {
                file_version,
                csar_version,
                created_by,
                entry_definitions,
            } => {
                let mut mapping = serde_yaml::Mapping::new();
                mapping.insert(META_FILE_VERSION_KEY.into(), file_version.as_str().into());
                mapping.insert(META_CSAR_VERSION_KEY.into(), csar_version.as_str().into());
                mapping.insert(META_CREATED_BY_KEY.into(), created_by.as_str().into());
                mapping.insert(
                    META_ENTRY_DEFINITIONS_KEY.into(),
                    entry_definitions.as_str().into(),
                );
                Ok(serde_yaml::to_string(&Value::Mapping(mapping))?)
            }
            Self::Inline { .. } => Err(Error::InvalidArgument(
                "inline metadata is embedded in the template, not written to TOSCA.meta".into(),
            )),
        }
    }
}

/// Metadata together with any artifact descriptors it declares
#[derive(Debug)]
pub struct ResolvedMetadata {
    pub record: MetadataRecord,
    pub artifacts: Vec<ArtifactDescriptor>,
}

/// Resolve the metadata record for an extracted archive rooted at `root`.
///
/// `strict_keys` upgrades unknown metadata keys from ignored to
/// [`Error::InvalidMetadata`]. Missing required keys are always errors.
pub fn resolve_metadata(root: &Path, strict_keys: bool) -> Result<ResolvedMetadata> {
    let meta_path = root.join(META_FILE);
    if meta_path.is_file() {
        debug!(path = %meta_path.display(), "resolving file-based metadata");
        resolve_file_based(&meta_path, strict_keys)
    } else {
        debug!(root = %root.display(), "no metadata file, resolving inline metadata");
        resolve_inline(root, strict_keys)
    }
}

fn resolve_file_based(meta_path: &Path, strict_keys: bool) -> Result<ResolvedMetadata> {
    let mapping = load_mapping(meta_path, META_FILE)?;

    if strict_keys {
        let known = [
            META_FILE_VERSION_KEY,
            META_CSAR_VERSION_KEY,
            META_CREATED_BY_KEY,
            META_ENTRY_DEFINITIONS_KEY,
            META_ARTIFACTS_KEY,
        ];
        reject_unknown_keys(&mapping, &known)?;
    }

    let file_version = require_version(&mapping, META_FILE_VERSION_KEY, META_FILE_VERSION)?;
    let csar_version = require_version(&mapping, META_CSAR_VERSION_KEY, CSAR_VERSION)?;
    let created_by = require_non_empty(&mapping, META_CREATED_BY_KEY)?;
    let entry_definitions = require_non_empty(&mapping, META_ENTRY_DEFINITIONS_KEY)?;

    let artifacts = parse_artifacts(&mapping)?;

    Ok(ResolvedMetadata {
        record: MetadataRecord::FileBased {
            file_version,
            csar_version,
            created_by,
            entry_definitions,
        },
        artifacts,
    })
}

fn resolve_inline(root: &Path, strict_keys: bool) -> Result<ResolvedMetadata> {
    let templates = root_templates(root)?;
    if templates.len() != 1 {
        return Err(Error::InvalidMetadata(format!(
            "exactly 1 YAML file must exist in the archive root, found {}",
            templates.len()
        )));
    }
    let entry_path = &templates[0];
    let entry = entry_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let document = load_mapping(entry_path, &entry)?;
    let metadata = match document.get("metadata") {
        Some(Value::Mapping(m)) => m.clone(),
        _ => {
            return Err(Error::InvalidMetadata(format!(
                "missing metadata section in {entry}"
            )))
        }
    };

    if strict_keys {
        let known = [
            META_TMPL_VERSION_KEY,
            META_TMPL_AUTHOR_KEY,
            META_TMPL_NAME_KEY,
            META_ARTIFACTS_KEY,
        ];
        reject_unknown_keys(&metadata, &known)?;
    }

    let template_version = require_version(&metadata, META_TMPL_VERSION_KEY, TEMPLATE_VERSION)?;
    let template_author = require_non_empty(&metadata, META_TMPL_AUTHOR_KEY)?;
    let template_name = require_non_empty(&metadata, META_TMPL_NAME_KEY)?;

    let artifacts = parse_artifacts(&metadata)?;

    Ok(ResolvedMetadata {
        record: MetadataRecord::Inline {
            template_version,
            template_author,
            template_name,
            entry,
        },
        artifacts,
    })
}

/// Find root-level `.yaml`/`.yml` files, sorted for deterministic errors
fn root_templates(root: &Path) -> Result<Vec<PathBuf>> {
    let mut templates = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => templates.push(path),
            _ => {}
        }
    }
    templates.sort();
    Ok(templates)
}

fn load_mapping(path: &Path, label: &str) -> Result<serde_yaml::Mapping> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::InvalidMetadata(format!("{label} is not valid YAML: {e}")))?;
    match value {
        Value::Mapping(m) => Ok(m),
        _ => Err(Error::InvalidMetadata(format!(
            "{label} must contain a YAML mapping"
        ))),
    }
}

/// Normalize a YAML scalar to its string form. YAML parses `1.1` as a
/// number, but versions are compared as strings.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn require_version(
    mapping: &serde_yaml::Mapping,
    key: &str,
    expected: &str,
) -> Result<String> {
    let actual = mapping
        .get(key)
        .and_then(scalar_to_string)
        .ok_or_else(|| Error::InvalidMetadata(format!("missing metadata key \"{key}\"")))?;
    if actual != expected {
        return Err(Error::InvalidMetadata(format!(
            "metadata key \"{key}\" must be \"{expected}\", got \"{actual}\""
        )));
    }
    Ok(actual)
}

fn require_non_empty(mapping: &serde_yaml::Mapping, key: &str) -> Result<String> {
    let value = mapping
        .get(key)
        .and_then(scalar_to_string)
        .unwrap_or_default();
    if value.is_empty() {
        return Err(Error::InvalidMetadata(format!(
            "missing metadata key \"{key}\""
        )));
    }
    Ok(value)
}

fn reject_unknown_keys(mapping: &serde_yaml::Mapping, known: &[&str]) -> Result<()> {
    for key in mapping.keys() {
        let name = scalar_to_string(key).unwrap_or_default();
        if !known.contains(&name.as_str()) {
            return Err(Error::InvalidMetadata(format!(
                "unknown metadata key \"{name}\""
            )));
        }
    }
    Ok(())
}

/// Parse the optional `artifacts` mapping into descriptors. Structural
/// validation of each descriptor happens in the artifact validator.
fn parse_artifacts(mapping: &serde_yaml::Mapping) -> Result<Vec<ArtifactDescriptor>> {
    let Some(Value::Mapping(artifacts)) = mapping.get(META_ARTIFACTS_KEY) else {
        return Ok(Vec::new());
    };

    let mut descriptors = Vec::with_capacity(artifacts.len());
    for (name, body) in artifacts {
        let name = scalar_to_string(name).ok_or_else(|| {
            Error::InvalidArtifact("artifact name must be a string".to_string())
        })?;
        let Value::Mapping(body) = body else {
            return Err(Error::InvalidArtifact(format!(
                "artifact \"{name}\" must be a mapping"
            )));
        };

        let content_type = body
            .get("content-type")
            .and_then(scalar_to_string);

        let signature = match body.get("signature") {
            None => None,
            Some(Value::Mapping(sig)) => Some(ArtifactSignature {
                algorithm: sig.get("algorithm").and_then(scalar_to_string),
                digest: sig.get("digest").and_then(scalar_to_string),
            }),
            Some(_) => {
                return Err(Error::InvalidArtifact(format!(
                    "signature of artifact \"{name}\" must be a mapping"
                )))
            }
        };

        descriptors.push(ArtifactDescriptor {
            name,
            content_type,
            signature,
        });
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_meta(root: &Path, content: &str) {
        let dir = root.join("TOSCA-Metadata");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("TOSCA.meta"), content).unwrap();
    }

    #[test]
    fn file_based_metadata_round_trips() {
        let root = TempDir::new().unwrap();
        let record = MetadataRecord::file_based("Example", "service.yaml");
        write_meta(root.path(), &record.to_meta_yaml().unwrap());

        let resolved = resolve_metadata(root.path(), false).unwrap();
        assert_eq!(resolved.record, record);
        assert_eq!(resolved.record.author(), "Example");
        assert_eq!(resolved.record.version(), "1.1");
        assert_eq!(resolved.record.entry_definitions(), "service.yaml");
        assert!(resolved.artifacts.is_empty());
    }

    #[test]
    fn numeric_versions_normalize_to_strings() {
        let root = TempDir::new().unwrap();
        write_meta(
            root.path(),
            "TOSCA-Meta-File-Version: 1.0\n\
             CSAR-Version: 1.1\n\
             Created-By: Example\n\
             Entry-Definitions: service.yaml\n",
        );

        let resolved = resolve_metadata(root.path(), false).unwrap();
        assert_eq!(resolved.record.metadata_file_version(), Some("1.0"));
        assert_eq!(resolved.record.version(), "1.1");
    }

    #[test]
    fn wrong_csar_version_is_invalid() {
        let root = TempDir::new().unwrap();
        write_meta(
            root.path(),
            "TOSCA-Meta-File-Version: '1.0'\n\
             CSAR-Version: '2.0'\n\
             Created-By: Example\n\
             Entry-Definitions: service.yaml\n",
        );

        let err = resolve_metadata(root.path(), false).unwrap_err();
        match err {
            Error::InvalidMetadata(msg) => assert!(msg.contains(META_CSAR_VERSION_KEY)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_author_names_the_key() {
        let root = TempDir::new().unwrap();
        write_meta(
            root.path(),
            "TOSCA-Meta-File-Version: '1.0'\n\
             CSAR-Version: '1.1'\n\
             Entry-Definitions: service.yaml\n",
        );

        let err = resolve_metadata(root.path(), false).unwrap_err();
        match err {
            Error::InvalidMetadata(msg) => assert!(msg.contains(META_CREATED_BY_KEY)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_keys_ignored_unless_strict() {
        let root = TempDir::new().unwrap();
        write_meta(
            root.path(),
            "TOSCA-Meta-File-Version: '1.0'\n\
             CSAR-Version: '1.1'\n\
             Created-By: Example\n\
             Entry-Definitions: service.yaml\n\
             X-Custom: whatever\n",
        );

        assert!(resolve_metadata(root.path(), false).is_ok());
        let err = resolve_metadata(root.path(), true).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn inline_metadata_requires_exactly_one_root_template() {
        let root = TempDir::new().unwrap();
        let err = resolve_metadata(root.path(), false).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));

        fs::write(root.path().join("a.yaml"), "metadata: {}\n").unwrap();
        fs::write(root.path().join("b.yaml"), "metadata: {}\n").unwrap();
        let err = resolve_metadata(root.path(), false).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn inline_metadata_resolves_entry_to_root_template() {
        let root = TempDir::new().unwrap();
        let template = r#"
metadata:
  template_version: '1.1'
  template_author: Example
  template_name: hello
"#;
        fs::write(root.path().join("service.yaml"), template).unwrap();

        let resolved = resolve_metadata(root.path(), false).unwrap();
        assert_eq!(resolved.record.entry_definitions(), "service.yaml");
        assert_eq!(resolved.record.template_name(), Some("hello"));
        assert_eq!(resolved.record.author(), "Example");
    }

    #[test]
    fn inline_metadata_missing_section_is_invalid() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("service.yaml"), "imports: []\n").unwrap();

        let err = resolve_metadata(root.path(), false).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn artifacts_mapping_is_parsed() {
        let root = TempDir::new().unwrap();
        let meta = r#"
TOSCA-Meta-File-Version: '1.0'
CSAR-Version: '1.1'
Created-By: Example
Entry-Definitions: service.yaml
artifacts:
  scripts/install.sh:
    content-type: application/x-sh
    signature:
      algorithm: sha256
      digest: c29tZWRpZ2VzdA==
"#;
        write_meta(root.path(), meta);

        let resolved = resolve_metadata(root.path(), false).unwrap();
        assert_eq!(resolved.artifacts.len(), 1);
        let artifact = &resolved.artifacts[0];
        assert_eq!(artifact.name, "scripts/install.sh");
        assert_eq!(artifact.content_type.as_deref(), Some("application/x-sh"));
        let sig = artifact.signature.as_ref().unwrap();
        assert_eq!(sig.algorithm.as_deref(), Some("sha256"));
    }
}
