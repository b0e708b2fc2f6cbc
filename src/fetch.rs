// src/fetch.rs

//! Source retrieval for CSAR packages
//!
//! Resolves a package source to bytes on local disk. Local sources are
//! checked for existence; remote sources are streamed into a private
//! scratch file owned by the reader, in fixed-size chunks with a bounded
//! request timeout.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;
use url::Url;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// A located package source: a path on disk, plus the scratch file guard
/// when the source was fetched remotely. Dropping the guard deletes the
/// scratch file.
#[derive(Debug)]
pub struct LocatedSource {
    pub path: PathBuf,
    pub scratch: Option<NamedTempFile>,
}

/// Resolve a source string to a local file.
///
/// `remote` selects URL semantics; otherwise `source` is treated as a
/// filesystem path. Fails with [`Error::NotFound`] for a missing local
/// file and [`Error::InvalidSource`] for a malformed URL or failed fetch.
pub fn fetch_source(source: &str, remote: bool, timeout: Duration) -> Result<LocatedSource> {
    if !remote {
        let path = normalize_path(source);
        if !path.is_file() {
            return Err(Error::NotFound(path));
        }
        debug!(path = %path.display(), "using local package source");
        return Ok(LocatedSource {
            path,
            scratch: None,
        });
    }

    let parsed =
        Url::parse(source).map_err(|e| Error::InvalidSource(format!("{source}: {e}")))?;
    debug!(url = %parsed, "fetching remote package source");

    let client = http_client(timeout)?;
    let response = client
        .get(parsed)
        .send()
        .map_err(|e| map_reqwest_error(source, e))?;
    if !response.status().is_success() {
        return Err(Error::InvalidSource(format!(
            "HTTP {} from {source}",
            response.status()
        )));
    }

    let mut scratch = NamedTempFile::new()?;
    let downloaded = stream_to_file(response, scratch.as_file_mut())
        .map_err(|e| map_stream_error(source, e))?;
    scratch.as_file_mut().flush()?;
    debug!(bytes = downloaded, path = %scratch.path().display(), "remote source downloaded");

    Ok(LocatedSource {
        path: scratch.path().to_path_buf(),
        scratch: Some(scratch),
    })
}

/// Probe a URL for reachability with a HEAD request.
///
/// Used by the reference resolver for URL-valued references. Timeouts
/// surface as [`Error::Timeout`]; everything else resolves to a plain
/// reachable/unreachable answer.
pub fn url_reachable(raw: &str, timeout: Duration) -> Result<bool> {
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return Ok(false),
    };
    let client = http_client(timeout)?;
    match client.head(parsed).send() {
        Ok(response) => Ok(response.status().is_success()),
        Err(e) if e.is_timeout() => Err(Error::Timeout(format!("HEAD {raw}"))),
        Err(_) => Ok(false),
    }
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::InvalidSource(format!("failed to create HTTP client: {e}")))
}

/// Stream an HTTP response body to a file without buffering it in memory.
fn stream_to_file(mut response: reqwest::blocking::Response, file: &mut File) -> Result<u64> {
    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| Error::InvalidSource(format!("failed to read response: {e}")))?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
    }

    Ok(downloaded)
}

/// Lexically normalize a local source path, collapsing `.` and resolvable
/// `..` segments.
fn normalize_path(source: &str) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in Path::new(source).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

fn map_reqwest_error(source: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("GET {source}"))
    } else {
        Error::InvalidSource(format!("failed to fetch {source}: {e}"))
    }
}

fn map_stream_error(source: &str, e: Error) -> Error {
    match e {
        Error::InvalidSource(msg) => Error::InvalidSource(format!("{source}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_source_must_exist() {
        let err = fetch_source(
            "/nonexistent/package.csar.zip",
            false,
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn local_source_resolves_to_same_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not really a zip").unwrap();

        let located = fetch_source(
            file.path().to_str().unwrap(),
            false,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(located.path, file.path());
        assert!(located.scratch.is_none());
    }

    #[test]
    fn local_source_path_is_normalized() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.csar.zip"), b"bytes").unwrap();

        // dot and dotdot segments collapse before the existence check
        let source = format!(
            "{}/./subdir/../package.csar.zip",
            dir.path().to_str().unwrap()
        );
        let located = fetch_source(&source, false, Duration::from_secs(5)).unwrap();
        assert_eq!(located.path, dir.path().join("package.csar.zip"));
    }

    #[test]
    fn malformed_url_is_invalid_source() {
        let err = fetch_source("not a url at all", true, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Error::InvalidSource(_)));
    }

    #[test]
    fn unreachable_probe_returns_false_for_garbage() {
        assert!(!url_reachable("::::", Duration::from_secs(1)).unwrap());
    }
}
