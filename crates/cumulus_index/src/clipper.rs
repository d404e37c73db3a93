//! Clipper - a worker's set of pinned chunk references.
//!
//! Each ingest worker routes points through one clipper at a time. The
//! first touch of a chunk pins it (holding a refcount in the registry);
//! dropping the clipper releases every pin in bulk, which is what makes
//! chunks eligible for eviction. The builder swaps in a fresh clipper every
//! `clip_interval` accepted points, bounding the worker's live-chunk
//! footprint.

use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::{ChunkCell, Registry};

pub struct Clipper<'r> {
  registry: &'r Registry,
  pinned: HashMap<u64, Arc<ChunkCell>>,
}

impl<'r> Clipper<'r> {
  pub fn new(registry: &'r Registry) -> Self {
    Self {
      registry,
      pinned: HashMap::new(),
    }
  }

  /// The cell pinned for `chunk_id`, if this clipper already holds it.
  pub fn pinned(&self, chunk_id: u64) -> Option<Arc<ChunkCell>> {
    self.pinned.get(&chunk_id).cloned()
  }

  /// Record a pin taken out through the registry. Idempotent per chunk id.
  pub fn pin(&mut self, chunk_id: u64, cell: Arc<ChunkCell>) {
    self.pinned.entry(chunk_id).or_insert(cell);
  }

  /// Number of chunks this clipper holds live.
  pub fn len(&self) -> usize {
    self.pinned.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pinned.is_empty()
  }
}

impl Drop for Clipper<'_> {
  fn drop(&mut self) {
    for (&chunk_id, _) in self.pinned.iter() {
      self.registry.clip(chunk_id);
    }
    self.pinned.clear();
  }
}
