// src/artifact.rs

//! Artifact validation
//!
//! Each declared artifact must map to a real file under the extracted root
//! and carry a well-formed `type/subtype` content type. Structural problems
//! are hard failures. Content-type accuracy is checked heuristically
//! against a MIME table and an extension-based guess; those findings are
//! advisory warnings only, since MIME inference is inherently imprecise.
//! A declared digest, however, is an integrity claim and is verified
//! byte-for-byte.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Buffer size for streaming digest computation (8 KB)
const DIGEST_BUFFER_SIZE: usize = 8192;

/// Declared digest over an artifact's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSignature {
    /// Digest algorithm name (`sha256`, `sha512`, `md5`)
    pub algorithm: Option<String>,
    /// Base64 encoding of the raw digest bytes
    pub digest: Option<String>,
}

/// An artifact declared in the archive metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Path of the artifact relative to the archive root
    pub name: String,
    /// Declared content type, `type/subtype`
    pub content_type: Option<String>,
    /// Optional integrity digest
    pub signature: Option<ArtifactSignature>,
}

/// Digest algorithms accepted in artifact signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
    Md5,
}

impl DigestAlgorithm {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "md5" => Ok(Self::Md5),
            other => Err(Error::InvalidArtifact(format!(
                "unknown digest algorithm \"{other}\""
            ))),
        }
    }
}

/// Compute the digest of a file, streaming its content
pub fn digest_file(algorithm: DigestAlgorithm, path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; DIGEST_BUFFER_SIZE];

    macro_rules! stream {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            hasher.finalize().to_vec()
        }};
    }

    Ok(match algorithm {
        DigestAlgorithm::Sha256 => stream!(Sha256::new()),
        DigestAlgorithm::Sha512 => stream!(Sha512::new()),
        DigestAlgorithm::Md5 => stream!(Md5::new()),
    })
}

/// Extension-to-MIME table with user-supplied overrides
#[derive(Debug, Clone)]
pub struct MimeTable {
    by_extension: HashMap<String, String>,
}

impl Default for MimeTable {
    fn default() -> Self {
        let builtin = [
            ("yaml", "application/x-yaml"),
            ("yml", "application/x-yaml"),
            ("json", "application/json"),
            ("xml", "application/xml"),
            ("txt", "text/plain"),
            ("sh", "application/x-sh"),
            ("py", "text/x-python"),
            ("zip", "application/zip"),
            ("tar", "application/x-tar"),
            ("gz", "application/gzip"),
        ];
        Self {
            by_extension: builtin
                .iter()
                .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
                .collect(),
        }
    }
}

impl MimeTable {
    /// Load user overrides from a YAML mapping of extension to MIME type,
    /// layered over the built-in table.
    pub fn with_overrides(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let overrides: HashMap<String, String> = serde_yaml::from_str(&content)?;
        let mut table = Self::default();
        debug!(count = overrides.len(), "loaded MIME overrides");
        table.by_extension.extend(overrides);
        Ok(table)
    }

    /// Guess a MIME type from the file extension
    pub fn guess(&self, name: &str) -> Option<&str> {
        let extension = Path::new(name).extension()?.to_str()?.to_lowercase();
        self.by_extension.get(&extension).map(String::as_str)
    }

    /// Whether any table entry maps to this content type
    pub fn knows_type(&self, content_type: &str) -> bool {
        self.by_extension.values().any(|v| v == content_type)
    }
}

/// Validate every declared artifact against the extracted tree.
///
/// Hard failures abort immediately; advisory findings are appended to
/// `warnings` and logged.
pub fn validate_artifacts(
    root: &Path,
    artifacts: &[ArtifactDescriptor],
    mime: &MimeTable,
    warnings: &mut Vec<String>,
) -> Result<()> {
    for artifact in artifacts {
        validate_artifact(root, artifact, mime, warnings)?;
    }
    Ok(())
}

fn validate_artifact(
    root: &Path,
    artifact: &ArtifactDescriptor,
    mime: &MimeTable,
    warnings: &mut Vec<String>,
) -> Result<()> {
    // Artifact names are in-archive paths; confine them before touching
    // the filesystem so a crafted name cannot reach outside the root.
    if Path::new(&artifact.name).is_absolute() {
        return Err(Error::InvalidArtifact(format!(
            "artifact name \"{}\" is an absolute path",
            artifact.name
        )));
    }
    let file = crate::refs::normalize_within(root, &root.join(&artifact.name)).ok_or_else(|| {
        Error::InvalidArtifact(format!(
            "artifact name \"{}\" escapes the archive root",
            artifact.name
        ))
    })?;
    if !file.is_file() {
        return Err(Error::MissingArtifact(artifact.name.clone()));
    }

    let content_type = artifact.content_type.as_deref().ok_or_else(|| {
        Error::InvalidArtifact(format!(
            "artifact \"{}\" has no content-type",
            artifact.name
        ))
    })?;
    let (_, subtype) = split_content_type(&artifact.name, content_type)?;

    if !subtype.starts_with("vnd.") && !subtype.starts_with("x-") {
        push_warning(
            warnings,
            format!(
                "artifact \"{}\": subtype \"{subtype}\" carries no vendor prefix",
                artifact.name
            ),
        );
    }
    if !mime.knows_type(content_type) {
        push_warning(
            warnings,
            format!(
                "artifact \"{}\": content-type \"{content_type}\" not present in MIME table",
                artifact.name
            ),
        );
    }
    if let Some(guessed) = mime.guess(&artifact.name) {
        if guessed != content_type {
            push_warning(
                warnings,
                format!(
                    "artifact \"{}\": declared content-type \"{content_type}\" \
                     differs from guessed \"{guessed}\"",
                    artifact.name
                ),
            );
        }
    }

    if let Some(signature) = &artifact.signature {
        verify_artifact_digest(&file, artifact, signature)?;
    }

    Ok(())
}

/// Require the `type/subtype` shape; returns the two halves
fn split_content_type<'a>(name: &str, content_type: &'a str) -> Result<(&'a str, &'a str)> {
    match content_type.split_once('/') {
        Some((kind, subtype))
            if !kind.is_empty() && !subtype.is_empty() && !subtype.contains('/') =>
        {
            Ok((kind, subtype))
        }
        _ => Err(Error::InvalidArtifact(format!(
            "artifact \"{name}\" has malformed content-type \"{content_type}\""
        ))),
    }
}

fn verify_artifact_digest(
    file: &Path,
    artifact: &ArtifactDescriptor,
    signature: &ArtifactSignature,
) -> Result<()> {
    let algorithm = signature.algorithm.as_deref().ok_or_else(|| {
        Error::InvalidArtifact(format!(
            "signature of artifact \"{}\" is missing its algorithm",
            artifact.name
        ))
    })?;
    let declared = signature.digest.as_deref().ok_or_else(|| {
        Error::InvalidArtifact(format!(
            "signature of artifact \"{}\" is missing its digest",
            artifact.name
        ))
    })?;

    let algorithm: DigestAlgorithm = algorithm.parse()?;
    let expected = BASE64.decode(declared).map_err(|e| {
        Error::InvalidArtifact(format!(
            "artifact \"{}\" digest is not valid base64: {e}",
            artifact.name
        ))
    })?;

    let actual = digest_file(algorithm, file)?;
    if actual != expected {
        return Err(Error::DigestMismatch {
            artifact: artifact.name.clone(),
            expected: hex::encode(&expected),
            actual: hex::encode(&actual),
        });
    }
    debug!(artifact = %artifact.name, %algorithm, "artifact digest verified");
    Ok(())
}

fn push_warning(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    warnings.push(message);
}
