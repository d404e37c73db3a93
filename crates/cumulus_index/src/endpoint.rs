//! Endpoint - keyed blob storage behind the registry and builder.
//!
//! The build output is a flat keyspace (metadata document, one blob per
//! serialized chunk), so the storage seam is a small get/put trait. A local
//! directory implementation ships here; HTTP/S3 endpoints satisfy the same
//! trait out of tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Request headers for HTTP-derived endpoints (e.g. range requests that
/// fetch only the first 16 KiB of a file for header previews).
pub type Headers = Vec<(String, String)>;

pub trait Endpoint: Send + Sync {
  /// Fetch a UTF-8 value.
  fn get(&self, key: &str) -> Result<String>;

  /// Fetch raw bytes.
  fn get_binary(&self, key: &str) -> Result<Vec<u8>>;

  /// Fetch raw bytes with request headers. Non-HTTP endpoints ignore them.
  fn get_binary_with(&self, key: &str, _headers: &Headers) -> Result<Vec<u8>> {
    self.get_binary(key)
  }

  fn put(&self, key: &str, data: &[u8]) -> Result<()>;

  /// Materialize a key as a local file.
  fn local_handle(&self, key: &str) -> Result<LocalHandle>;

  fn is_remote(&self) -> bool;

  /// True when keys resolve over HTTP(S).
  fn is_http_derived(&self) -> bool {
    false
  }

  /// Local root directory, when one exists.
  fn root(&self) -> Option<&Path>;
}

/// A readable local file, possibly staged into a tmp directory.
///
/// Owned handles delete their file on drop; borrowed handles leave the
/// source untouched.
pub struct LocalHandle {
  path: PathBuf,
  owned: bool,
}

impl LocalHandle {
  pub fn borrowed(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      owned: false,
    }
  }

  pub fn owned(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      owned: true,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for LocalHandle {
  fn drop(&mut self) {
    if self.owned {
      let _ = fs::remove_file(&self.path);
    }
  }
}

/// Flat keyspace over a local directory.
pub struct DirectoryEndpoint {
  root: PathBuf,
}

impl DirectoryEndpoint {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn full(&self, key: &str) -> PathBuf {
    self.root.join(key)
  }
}

impl Endpoint for DirectoryEndpoint {
  fn get(&self, key: &str) -> Result<String> {
    fs::read_to_string(self.full(key)).with_context(|| format!("reading {}", self.full(key).display()))
  }

  fn get_binary(&self, key: &str) -> Result<Vec<u8>> {
    fs::read(self.full(key)).with_context(|| format!("reading {}", self.full(key).display()))
  }

  fn put(&self, key: &str, data: &[u8]) -> Result<()> {
    let path = self.full(key);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
  }

  fn local_handle(&self, key: &str) -> Result<LocalHandle> {
    let path = self.full(key);
    if !path.exists() {
      bail!("no such key: {}", path.display());
    }
    Ok(LocalHandle::borrowed(path))
  }

  fn is_remote(&self) -> bool {
    false
  }

  fn root(&self) -> Option<&Path> {
    Some(&self.root)
  }
}

/// True for scheme-prefixed paths (`s3://...`, `https://...`).
pub fn is_remote_path(path: &str) -> bool {
  path.contains("://")
}

/// Resolve an input path to a readable local file.
///
/// Plain filesystem paths are used in place. Scheme-prefixed paths need a
/// remote endpoint implementation to stage them through `tmp`; none ships
/// with this crate.
pub fn fetch_local(path: &str, _tmp: &dyn Endpoint) -> Result<LocalHandle> {
  if is_remote_path(path) {
    bail!("remote input {} requires a remote endpoint implementation", path);
  }
  Ok(LocalHandle::borrowed(path))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_directory_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let ep = DirectoryEndpoint::new(dir.path());

    ep.put("entwine", b"{}").unwrap();
    assert_eq!(ep.get("entwine").unwrap(), "{}");
    assert_eq!(ep.get_binary("entwine").unwrap(), b"{}");
    assert!(!ep.is_remote());
    assert_eq!(ep.root(), Some(dir.path()));
  }

  #[test]
  fn test_missing_key_errors() {
    let dir = tempfile::tempdir().unwrap();
    let ep = DirectoryEndpoint::new(dir.path());
    assert!(ep.get("nope").is_err());
    assert!(ep.local_handle("nope").is_err());
  }

  #[test]
  fn test_owned_handle_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staged");
    fs::write(&path, b"data").unwrap();

    {
      let handle = LocalHandle::owned(&path);
      assert_eq!(handle.path(), path);
    }
    assert!(!path.exists());
  }

  #[test]
  fn test_borrowed_handle_leaves_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input");
    fs::write(&path, b"data").unwrap();

    {
      let _handle = LocalHandle::borrowed(&path);
    }
    assert!(path.exists());
  }

  #[test]
  fn test_remote_path_detection() {
    assert!(is_remote_path("s3://bucket/cloud.laz"));
    assert!(is_remote_path("https://host/cloud.laz"));
    assert!(!is_remote_path("/data/cloud.laz"));
    assert!(!is_remote_path("relative/cloud.laz"));
  }
}
