// src/lib.rs

//! CSAR package toolkit
//!
//! Reads, validates, and writes CSAR (Cloud Service Archive) packages:
//! ZIP containers holding a TOSCA service template plus metadata,
//! artifacts, and optional integrity signatures. The crate guarantees the
//! *container* is well-formed and that every referenced resource exists
//! and, where declared, is authentic; interpreting TOSCA semantics is the
//! job of a downstream processor fed by [`CsarReader`].
//!
//! # Architecture
//!
//! - Pipeline-on-construction: [`CsarReader::open`] runs locate, extract,
//!   metadata resolution, reference resolution, and artifact validation in
//!   strict order; a reader that exists is a validated archive
//! - Scoped scratch resources: download file and extraction directory are
//!   owned by the reader and removed on drop, on every exit path
//! - Build-then-validate: [`CsarBuilder`] re-reads its own output, so an
//!   invalid archive is never produced
//! - Hard errors vs. advisories: structural and integrity problems
//!   fail fast as [`Error`]; heuristic content-type findings accumulate on
//!   a [`ValidationReport`]
//! - Whole-archive signatures: detached HMAC-SHA-256 digests with
//!   constant-time verification

pub mod artifact;
pub mod builder;
mod error;
pub mod extract;
pub mod fetch;
pub mod meta;
pub mod reader;
pub mod refs;
pub mod sign;

pub use artifact::{ArtifactDescriptor, ArtifactSignature, DigestAlgorithm, MimeTable};
pub use builder::CsarBuilder;
pub use error::{Error, Result};
pub use meta::{MetadataRecord, META_FILE};
pub use reader::{CsarReader, ReaderOptions, ValidationReport, DEFAULT_TIMEOUT};
pub use refs::{ReferenceKind, BASE_PROFILE_IMPORT};
pub use sign::{sign_archive, verify_archive, write_signature, SignatureSource};
