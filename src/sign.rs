// src/sign.rs

//! Whole-archive keyed-hash signatures
//!
//! Signs the finished archive byte stream with HMAC-SHA-256 and verifies
//! detached signatures. The archive is streamed in fixed-size chunks, and
//! verification compares digests in constant time.

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Buffer size for streaming the archive (8 KB)
const SIGN_BUFFER_SIZE: usize = 8192;

/// Where a detached signature comes from during verification
#[derive(Debug, Clone, Copy)]
pub enum SignatureSource<'a> {
    /// Hex digest passed inline
    Inline(&'a str),
    /// Plain text file holding the hex digest
    File(&'a Path),
}

/// Compute the keyed-hash signature of an archive file.
///
/// Returns the hex-encoded HMAC-SHA-256 digest of the archive bytes.
pub fn sign_archive(key: &[u8], archive: &Path) -> Result<String> {
    let digest = hex::encode(keyed_digest(key, archive)?);
    debug!(archive = %archive.display(), "archive signed");
    Ok(digest)
}

/// Stream the archive into the keyed hash, returning raw digest bytes
fn keyed_digest(key: &[u8], archive: &Path) -> Result<Vec<u8>> {
    if !archive.is_file() {
        return Err(Error::NotFound(archive.to_path_buf()));
    }
    let mut file = File::open(archive)?;
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::InvalidArgument(format!("invalid HMAC key: {e}")))?;

    let mut buffer = [0u8; SIGN_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        mac.update(&buffer[..n]);
    }

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sign an archive and persist the digest to a sibling `.sig` file (or a
/// caller-chosen path). Returns the path written.
pub fn write_signature(key: &[u8], archive: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let digest = sign_archive(key, archive)?;
    let path = match output {
        Some(p) => p.to_path_buf(),
        None => sibling_signature_path(archive),
    };
    fs::write(&path, format!("{digest}\n"))?;
    debug!(path = %path.display(), "signature written");
    Ok(path)
}

/// Verify an archive against a detached signature.
///
/// Recomputes the keyed hash and compares in constant time. A wrong key or
/// altered archive yields `Ok(false)`; only API misuse (a digest that is
/// not valid hex) or IO failures produce errors.
pub fn verify_archive(key: &[u8], archive: &Path, source: SignatureSource<'_>) -> Result<bool> {
    let declared = match source {
        SignatureSource::Inline(digest) => digest.trim().to_string(),
        SignatureSource::File(path) => fs::read_to_string(path)?.trim().to_string(),
    };
    let declared = hex::decode(&declared)
        .map_err(|_| Error::InvalidArgument("signature digest is not valid hex".to_string()))?;

    let actual = keyed_digest(key, archive)?;

    // ct_eq is length-aware and constant-time over equal-length inputs
    Ok(bool::from(actual.as_slice().ct_eq(declared.as_slice())))
}

/// Default signature path: the archive file name with `.sig` appended
fn sibling_signature_path(archive: &Path) -> PathBuf {
    let mut name = archive.file_name().unwrap_or_default().to_os_string();
    name.push(".sig");
    archive.with_file_name(name)
}
