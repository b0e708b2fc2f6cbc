// src/error.rs
//! Error types for CSAR validation and construction
//!
//! Structural and integrity failures are fail-fast: the first one aborts
//! the pipeline and names the offending key, path, or reference. Heuristic
//! content-type findings are never errors; they accumulate as warnings on
//! the reader's [`ValidationReport`](crate::reader::ValidationReport).

use std::path::PathBuf;
use thiserror::Error;

/// Result type for CSAR operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the CSAR pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Local source path does not reference an existing file
    #[error("source does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// Remote source is not a well-formed URL, or the fetch failed
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Source is not a valid ZIP container, or an entry escapes the
    /// extraction directory
    #[error("invalid archive format: {0}")]
    InvalidFormat(String),

    /// Metadata schema violation: missing key, wrong version, wrong
    /// root-level file count
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A mandatory import, implementation, or artifact reference could not
    /// be resolved
    #[error("unresolved reference \"{reference}\" declared in {declared_in}")]
    MissingReference {
        reference: String,
        declared_in: String,
    },

    /// Malformed reference structure in the template
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Declared artifact has no backing file in the archive
    #[error("missing artifact file: {0}")]
    MissingArtifact(String),

    /// Artifact descriptor is structurally invalid
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Recomputed artifact digest does not match the declared one
    #[error("digest mismatch for artifact {artifact}: expected {expected}, got {actual}")]
    DigestMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Signature API misuse (e.g. malformed digest input)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A network operation exceeded its bounded timeout
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Underlying filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse or serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
