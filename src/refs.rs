// src/refs.rs

//! External reference resolution
//!
//! Walks the entry definitions template and checks that every resource it
//! points at actually exists: `imports`, node template `artifacts`, and
//! interface operation `implementation`s. Relative paths resolve against
//! the directory containing the referencing template, never the archive
//! root; absolute paths and `..` escapes are rejected outright. URL
//! references get a bounded reachability probe.
//!
//! The whole scan runs against the extracted scratch tree and therefore
//! shares the owning reader's scope.

use crate::error::{Error, Result};
use crate::fetch::url_reachable;
use serde_yaml::Value;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Implicit base profile import, dropped before resolution
pub const BASE_PROFILE_IMPORT: &str = "tosca-simple-profile-1.0/tosca-simple-profile-1.0.yaml";

/// Kinds of external references found in a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Import,
    InterfaceImplementation,
    ArtifactFile,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Import => "import",
            Self::InterfaceImplementation => "interface implementation",
            Self::ArtifactFile => "artifact file",
        };
        write!(f, "{name}")
    }
}

struct Resolver<'a> {
    root: &'a Path,
    /// Template whose references are being resolved, relative to root
    entry: &'a str,
    timeout: Duration,
    warnings: &'a mut Vec<String>,
}

/// Validate every external reference declared by the entry template.
pub fn validate_references(
    root: &Path,
    entry: &str,
    template: &Value,
    timeout: Duration,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let mut resolver = Resolver {
        root,
        entry,
        timeout,
        warnings,
    };
    resolver.check_imports(template)?;
    resolver.check_node_templates(template)?;
    Ok(())
}

impl Resolver<'_> {
    fn check_imports(&mut self, template: &Value) -> Result<()> {
        let Some(imports) = template.get("imports") else {
            return Ok(());
        };
        let Value::Sequence(imports) = imports else {
            return Err(Error::InvalidReference(format!(
                "imports of {} must be a sequence",
                self.entry
            )));
        };

        for import in imports {
            let Value::String(import) = import else {
                return Err(Error::InvalidReference(format!(
                    "non-string import in {}",
                    self.entry
                )));
            };
            if import == BASE_PROFILE_IMPORT {
                continue;
            }
            self.resolve(import, ReferenceKind::Import, true)?;
        }
        Ok(())
    }

    fn check_node_templates(&mut self, template: &Value) -> Result<()> {
        let Some(Value::Mapping(nodes)) = template
            .get("topology_template")
            .and_then(|t| t.get("node_templates"))
        else {
            return Ok(());
        };

        for (node_name, node) in nodes {
            let node_name = node_name.as_str().unwrap_or("<unnamed>");
            if let Some(Value::Mapping(artifacts)) = node.get("artifacts") {
                for (artifact_name, artifact) in artifacts {
                    self.check_artifact(node_name, artifact_name, artifact)?;
                }
            }
            if let Some(Value::Mapping(interfaces)) = node.get("interfaces") {
                for (_, interface) in interfaces {
                    self.check_interface(interface)?;
                }
            }
        }
        Ok(())
    }

    fn check_artifact(
        &mut self,
        node_name: &str,
        artifact_name: &Value,
        artifact: &Value,
    ) -> Result<()> {
        match artifact {
            Value::String(file) => self.resolve(file, ReferenceKind::ArtifactFile, true),
            Value::Mapping(mapping) => match mapping.get("file") {
                Some(Value::String(file)) => self.resolve(file, ReferenceKind::ArtifactFile, true),
                _ => Err(Error::InvalidReference(format!(
                    "artifact {:?} of node template \"{node_name}\" has no file field",
                    artifact_name.as_str().unwrap_or("<unnamed>")
                ))),
            },
            _ => Err(Error::InvalidReference(format!(
                "unexpected artifact definition in node template \"{node_name}\""
            ))),
        }
    }

    fn check_interface(&mut self, interface: &Value) -> Result<()> {
        let Value::Mapping(operations) = interface else {
            return Ok(());
        };
        for (_, operation) in operations {
            match operation {
                // Bare operation strings are advisory
                Value::String(value) => {
                    self.resolve(value, ReferenceKind::InterfaceImplementation, false)?
                }
                Value::Mapping(mapping) => {
                    if let Some(Value::String(implementation)) = mapping.get("implementation") {
                        self.resolve(implementation, ReferenceKind::InterfaceImplementation, true)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve a single reference value. Mandatory failures are
    /// [`Error::MissingReference`]; advisory failures only warn.
    fn resolve(&mut self, reference: &str, kind: ReferenceKind, mandatory: bool) -> Result<()> {
        if let Ok(parsed) = Url::parse(reference) {
            if matches!(parsed.scheme(), "http" | "https") {
                return self.resolve_url(reference, kind, mandatory);
            }
        }
        self.resolve_path(reference, kind, mandatory)
    }

    fn resolve_url(&mut self, reference: &str, kind: ReferenceKind, mandatory: bool) -> Result<()> {
        if url_reachable(reference, self.timeout)? {
            debug!(reference, %kind, "URL reference reachable");
            return Ok(());
        }
        self.missing(reference, kind, mandatory)
    }

    fn resolve_path(&mut self, reference: &str, kind: ReferenceKind, mandatory: bool) -> Result<()> {
        if Path::new(reference).is_absolute() {
            return Err(Error::InvalidReference(format!(
                "absolute reference \"{reference}\" in {}",
                self.entry
            )));
        }

        // Resolve against the directory containing the referencing template
        let base = self
            .root
            .join(self.entry)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.to_path_buf());

        let Some(resolved) = normalize_within(self.root, &base.join(reference)) else {
            return Err(Error::InvalidReference(format!(
                "reference \"{reference}\" escapes the archive root"
            )));
        };

        if resolved.is_file() {
            debug!(reference, %kind, "reference resolved");
            return Ok(());
        }
        self.missing(reference, kind, mandatory)
    }

    fn missing(&mut self, reference: &str, kind: ReferenceKind, mandatory: bool) -> Result<()> {
        if mandatory {
            return Err(Error::MissingReference {
                reference: reference.to_string(),
                declared_in: self.entry.to_string(),
            });
        }
        let message = format!(
            "advisory {kind} reference \"{reference}\" in {} could not be resolved",
            self.entry
        );
        warn!("{message}");
        self.warnings.push(message);
        Ok(())
    }
}

/// Lexically normalize `path`, returning `None` if `..` segments escape
/// `root`. Works for paths that do not exist yet, unlike canonicalization.
pub(crate) fn normalize_within(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(root.join(normalized))
}
