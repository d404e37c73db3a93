//! In-memory endpoint for exercising registry and builder flows in tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};

use crate::endpoint::{Endpoint, LocalHandle};

/// Endpoint backed by a map, with fault injection for put failures.
#[derive(Default)]
pub struct MemEndpoint {
  blobs: Mutex<HashMap<String, Vec<u8>>>,
  gets: AtomicUsize,
  /// Number of upcoming puts that fail before writes succeed again.
  fail_puts: AtomicUsize,
}

impl MemEndpoint {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn has(&self, key: &str) -> bool {
    self.blobs.lock().unwrap().contains_key(key)
  }

  pub fn get_count(&self) -> usize {
    self.gets.load(Ordering::Relaxed)
  }

  pub fn fail_next_puts(&self, n: usize) {
    self.fail_puts.store(n, Ordering::Relaxed);
  }
}

impl Endpoint for MemEndpoint {
  fn get(&self, key: &str) -> Result<String> {
    String::from_utf8(self.get_binary(key)?).map_err(|e| anyhow!("{key} is not utf-8: {e}"))
  }

  fn get_binary(&self, key: &str) -> Result<Vec<u8>> {
    self.gets.fetch_add(1, Ordering::Relaxed);
    self
      .blobs
      .lock()
      .unwrap()
      .get(key)
      .cloned()
      .ok_or_else(|| anyhow!("no such key: {key}"))
  }

  fn put(&self, key: &str, data: &[u8]) -> Result<()> {
    let pending = self.fail_puts.load(Ordering::Relaxed);
    if pending > 0 {
      self.fail_puts.store(pending - 1, Ordering::Relaxed);
      bail!("injected put failure for {key}");
    }
    self.blobs.lock().unwrap().insert(key.to_string(), data.to_vec());
    Ok(())
  }

  fn local_handle(&self, key: &str) -> Result<LocalHandle> {
    bail!("memory endpoint has no local files for {key}")
  }

  fn is_remote(&self) -> bool {
    false
  }

  fn root(&self) -> Option<&Path> {
    None
  }
}
