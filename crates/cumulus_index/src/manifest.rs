//! Manifest - append-only record of origin files.
//!
//! Every input file gets a stable origin id for the life of the build, and
//! that id is stamped into every point the file produced. Re-inserting a
//! path is refused here, which is what makes crash-and-resume ingestion
//! idempotent at the file level.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Lifecycle of one origin file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
  /// Registered but not yet fully ingested.
  Pending,
  /// Ingested; points may reference this origin.
  Inserted,
  /// Ingestion failed; other files continue.
  Error,
  /// The reader could not open the file at all.
  Omitted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
  pub path: String,
  pub status: FileStatus,
}

struct ManifestInner {
  files: Vec<FileInfo>,
  by_path: HashMap<String, u64>,
}

/// Thread-safe origin registry.
pub struct Manifest {
  inner: Mutex<ManifestInner>,
}

impl Manifest {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(ManifestInner {
        files: Vec::new(),
        by_path: HashMap::new(),
      }),
    }
  }

  /// Rebuild from saved metadata: parallel path and status arrays.
  pub fn from_parts(paths: Vec<String>, statuses: Vec<FileStatus>) -> Self {
    let by_path = paths
      .iter()
      .enumerate()
      .map(|(i, p)| (p.clone(), i as u64))
      .collect();
    let files = paths
      .into_iter()
      .zip(statuses)
      .map(|(path, status)| FileInfo { path, status })
      .collect();
    Self {
      inner: Mutex::new(ManifestInner { files, by_path }),
    }
  }

  /// Register a path, returning its new origin id, or `None` when an equal
  /// path was previously inserted.
  pub fn add_origin(&self, path: &str) -> Option<u64> {
    let mut inner = self.inner.lock().unwrap();
    if inner.by_path.contains_key(path) {
      return None;
    }
    let origin = inner.files.len() as u64;
    inner.by_path.insert(path.to_string(), origin);
    inner.files.push(FileInfo {
      path: path.to_string(),
      status: FileStatus::Pending,
    });
    Some(origin)
  }

  /// Record a file the reader could not open.
  pub fn add_omission(&self, path: &str) {
    let mut inner = self.inner.lock().unwrap();
    if inner.by_path.contains_key(path) {
      return;
    }
    let origin = inner.files.len() as u64;
    inner.by_path.insert(path.to_string(), origin);
    inner.files.push(FileInfo {
      path: path.to_string(),
      status: FileStatus::Omitted,
    });
  }

  pub fn set_status(&self, origin: u64, status: FileStatus) {
    let mut inner = self.inner.lock().unwrap();
    inner.files[origin as usize].status = status;
  }

  pub fn status(&self, origin: u64) -> FileStatus {
    self.inner.lock().unwrap().files[origin as usize].status
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().unwrap().files.is_empty()
  }

  /// Snapshot in origin order.
  pub fn snapshot(&self) -> Vec<FileInfo> {
    self.inner.lock().unwrap().files.clone()
  }
}

impl Default for Manifest {
  fn default() -> Self {
    Self::new()
  }
}
