//! Registry - lookup, lazy materialization, and bounded retention of chunks.
//!
//! The registry owns every chunk. The base chunk stays resident for the
//! whole build; cold chunks page in on first touch and page out when their
//! last clipper reference drops. Serialization runs on a dedicated clip
//! pool so ingest workers never block on output I/O longer than a schedule.
//!
//! Locking: the slot map's mutex guards residency transitions and
//! refcounts, each chunk's own mutex guards its contents, and the canonical
//! order is map before chunk. No I/O ever happens under the map lock; a
//! chunk id in flight (loading or serializing) is represented by a gate
//! that waiters block on outside the lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::warn;

use crate::chunk::{BaseChunk, SparseChunk};
use crate::climber::Climber;
use crate::clipper::Clipper;
use crate::endpoint::Endpoint;
use crate::point::PointInfo;
use crate::schema::Schema;
use crate::structure::Structure;
use crate::threading::TaskPool;

/// A resident cold chunk, shared between the registry and the clippers
/// pinning it.
pub struct ChunkCell {
  chunk: Mutex<SparseChunk>,
}

impl ChunkCell {
  fn new(chunk: SparseChunk) -> Arc<Self> {
    Arc::new(Self {
      chunk: Mutex::new(chunk),
    })
  }

  /// Offer a point to the cell for `local_id`; hands it back when full.
  pub fn insert(&self, local_id: u64, info: PointInfo) -> Option<PointInfo> {
    self.chunk.lock().unwrap().insert(local_id, info)
  }

  pub fn num_points(&self) -> u64 {
    self.chunk.lock().unwrap().num_points()
  }
}

/// Residency state for one chunk id.
///
/// `Pending` covers both directions of transit (loading and serializing);
/// the receiver unblocks when the transition owner drops its sender.
enum Slot {
  Resident { refs: u64, cell: Arc<ChunkCell> },
  Pending(Receiver<()>),
}

struct RegistryInner {
  endpoint: Arc<dyn Endpoint>,
  schema: Schema,
  structure: Structure,
  compressed: bool,
  base: Mutex<BaseChunk>,
  slots: Mutex<HashMap<u64, Slot>>,
  /// Every chunk id ever serialized to the endpoint. Seeds re-loads and
  /// becomes the `ids` list in saved metadata.
  written: Mutex<BTreeSet<u64>>,
}

pub struct Registry {
  inner: Arc<RegistryInner>,
  clip_pool: TaskPool,
}

impl Registry {
  pub fn new(
    endpoint: Arc<dyn Endpoint>,
    schema: Schema,
    structure: Structure,
    compressed: bool,
    clip_threads: usize,
  ) -> Result<Self> {
    let base = BaseChunk::new(&structure);
    Ok(Self {
      inner: Arc::new(RegistryInner {
        endpoint,
        schema,
        structure,
        compressed,
        base: Mutex::new(base),
        slots: Mutex::new(HashMap::new()),
        written: Mutex::new(BTreeSet::new()),
      }),
      clip_pool: TaskPool::new(clip_threads)?,
    })
  }

  /// Rebuild a registry over an existing store: install the base chunk from
  /// its serialized blob and seed the known-id set so future touches fetch
  /// instead of allocating.
  pub fn load(
    endpoint: Arc<dyn Endpoint>,
    schema: Schema,
    structure: Structure,
    compressed: bool,
    clip_threads: usize,
    ids: impl IntoIterator<Item = u64>,
  ) -> Result<Self> {
    let key = format!(
      "{}{}",
      structure.base_index_begin(),
      structure.subset_postfix()
    );
    let bytes = endpoint
      .get_binary(&key)
      .with_context(|| format!("fetching base chunk {key}"))?;
    let base = BaseChunk::deserialize(&structure, &schema, compressed, bytes)?;

    Ok(Self {
      inner: Arc::new(RegistryInner {
        endpoint,
        schema,
        structure,
        compressed,
        base: Mutex::new(base),
        slots: Mutex::new(HashMap::new()),
        written: Mutex::new(ids.into_iter().collect()),
      }),
      clip_pool: TaskPool::new(clip_threads)?,
    })
  }

  pub fn structure(&self) -> &Structure {
    &self.inner.structure
  }

  /// Descend the climber until a chunk accepts the point.
  ///
  /// Returns `Ok(None)` on acceptance and `Ok(Some(info))` when the point
  /// fell through the terminal depth; the caller records the fall-through
  /// and recycles the record. An `Err` means chunk materialization failed.
  pub fn add_point(
    &self,
    info: PointInfo,
    climber: &mut Climber,
    clipper: &mut Clipper,
  ) -> Result<Option<PointInfo>> {
    let structure = &self.inner.structure;
    let p = info.point;
    let mut info = info;

    loop {
      if climber.depth() >= structure.cold_depth_end() {
        return Ok(Some(info));
      }
      if climber.depth() < structure.base_depth_begin() {
        climber.magnify(p);
        continue;
      }

      let node_id = climber.node_id();
      let rejected = if structure.is_base(node_id) {
        self.inner.base.lock().unwrap().insert(node_id, info)
      } else {
        let chunk_id = structure.chunk_id_for(node_id);
        let cell = match clipper.pinned(chunk_id) {
          Some(cell) => cell,
          None => {
            let cell = self.inner.touch(chunk_id)?;
            clipper.pin(chunk_id, Arc::clone(&cell));
            cell
          }
        };
        cell.insert(node_id - chunk_id, info)
      };

      match rejected {
        None => return Ok(None),
        Some(bounced) => {
          info = bounced;
          climber.magnify(p);
        }
      }
    }
  }

  /// Drop one clipper reference. At zero the chunk leaves residency: its
  /// serialization is scheduled on the clip pool and a gate replaces the
  /// slot, so a racing touch waits for the write to complete and then
  /// reloads from the endpoint.
  pub(crate) fn clip(&self, chunk_id: u64) {
    let mut slots = self.inner.slots.lock().unwrap();
    let slot = slots.get_mut(&chunk_id);
    let Some(Slot::Resident { refs, cell }) = slot else {
      panic!("clip of non-resident chunk {chunk_id}");
    };
    assert!(*refs > 0, "refcount underflow on chunk {chunk_id}");
    *refs -= 1;
    if *refs > 0 {
      return;
    }

    let cell = Arc::clone(cell);
    let (tx, rx) = bounded::<()>(0);
    slots.insert(chunk_id, Slot::Pending(rx));
    drop(slots);

    let inner = Arc::clone(&self.inner);
    self.clip_pool.add(move || {
      inner.evict(chunk_id, cell, tx);
    });
  }

  /// Flush everything and write the base chunk in place.
  ///
  /// Waits for in-flight evictions, serializes every still-resident cold
  /// chunk (retrying a failed put once), then writes the base chunk under
  /// `{base_index_begin}{postfix}`. Returns the full list of chunk ids ever
  /// serialized, for the metadata document.
  pub fn save(&self) -> Result<Vec<u64>> {
    self.clip_pool.join();

    let resident: Vec<(u64, Arc<ChunkCell>)> = {
      let slots = self.inner.slots.lock().unwrap();
      slots
        .iter()
        .map(|(&id, slot)| match slot {
          Slot::Resident { cell, .. } => (id, Arc::clone(cell)),
          Slot::Pending(_) => panic!("chunk {id} still in transit after clip pool drained"),
        })
        .collect()
    };

    for (id, cell) in resident {
      let key = id.to_string();
      let payload = {
        let chunk = cell.chunk.lock().unwrap();
        if chunk.is_empty() && !self.inner.written.lock().unwrap().contains(&id) {
          None
        } else {
          Some(chunk.serialize(&self.inner.schema, self.inner.compressed))
        }
      };
      if let Some(bytes) = payload {
        if let Err(e) = self.inner.endpoint.put(&key, &bytes) {
          warn!("put of chunk {id} failed ({e:#}); retrying");
          self
            .inner
            .endpoint
            .put(&key, &bytes)
            .with_context(|| format!("writing chunk {id}"))?;
        }
        self.inner.written.lock().unwrap().insert(id);
      }
      self.inner.slots.lock().unwrap().remove(&id);
    }

    let base_key = format!(
      "{}{}",
      self.inner.structure.base_index_begin(),
      self.inner.structure.subset_postfix()
    );
    let base_bytes = {
      let base = self.inner.base.lock().unwrap();
      base.serialize(&self.inner.schema, self.inner.compressed)
    };
    self
      .inner
      .endpoint
      .put(&base_key, &base_bytes)
      .context("writing base chunk")?;

    self.clip_pool.go();
    Ok(self.inner.written.lock().unwrap().iter().copied().collect())
  }

  /// Points currently held in the base chunk.
  pub fn base_points(&self) -> u64 {
    self.inner.base.lock().unwrap().num_points()
  }

  #[cfg(test)]
  pub(crate) fn touch_for_test(&self, chunk_id: u64) -> Result<Arc<ChunkCell>> {
    self.inner.touch(chunk_id)
  }

  #[cfg(test)]
  pub(crate) fn resident_count(&self) -> usize {
    self.inner.slots.lock().unwrap().len()
  }
}

impl RegistryInner {
  /// Locate or materialize a chunk, incrementing its refcount.
  ///
  /// At most one thread materializes a given id: the first absent lookup
  /// installs a gate and performs the fetch-or-allocate outside the map
  /// lock; every concurrent toucher blocks on the gate and retries.
  fn touch(&self, chunk_id: u64) -> Result<Arc<ChunkCell>> {
    loop {
      let gate = {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(&chunk_id) {
          Some(Slot::Resident { refs, cell }) => {
            *refs += 1;
            return Ok(Arc::clone(cell));
          }
          Some(Slot::Pending(rx)) => rx.clone(),
          None => {
            let (tx, rx) = bounded::<()>(0);
            slots.insert(chunk_id, Slot::Pending(rx));
            drop(slots);
            return self.materialize(chunk_id, tx);
          }
        }
      };
      // Block until the transition owner drops its sender, then retry.
      let _ = gate.recv();
    }
  }

  fn materialize(&self, chunk_id: u64, gate: Sender<()>) -> Result<Arc<ChunkCell>> {
    let known = self.written.lock().unwrap().contains(&chunk_id);
    let loaded: Result<SparseChunk> = if known {
      self
        .endpoint
        .get_binary(&chunk_id.to_string())
        .and_then(|bytes| {
          SparseChunk::deserialize(chunk_id, &self.structure, &self.schema, self.compressed, bytes)
        })
        .with_context(|| format!("materializing chunk {chunk_id}"))
    } else {
      Ok(SparseChunk::new(chunk_id, &self.structure))
    };

    let mut slots = self.slots.lock().unwrap();
    let result = match loaded {
      Ok(chunk) => {
        let cell = ChunkCell::new(chunk);
        slots.insert(
          chunk_id,
          Slot::Resident {
            refs: 1,
            cell: Arc::clone(&cell),
          },
        );
        Ok(cell)
      }
      Err(e) => {
        slots.remove(&chunk_id);
        Err(e)
      }
    };
    drop(slots);
    drop(gate);
    result
  }

  /// Serialize an unreferenced chunk and drop it from residency.
  ///
  /// A put failure keeps the chunk resident and dirty; `save` retries it.
  /// Empty never-written chunks are simply dropped.
  fn evict(&self, chunk_id: u64, cell: Arc<ChunkCell>, gate: Sender<()>) {
    let payload = {
      let chunk = cell.chunk.lock().unwrap();
      if chunk.is_empty() && !self.written.lock().unwrap().contains(&chunk_id) {
        None
      } else {
        Some(chunk.serialize(&self.schema, self.compressed))
      }
    };

    match payload {
      None => {
        self.slots.lock().unwrap().remove(&chunk_id);
      }
      Some(bytes) => match self.endpoint.put(&chunk_id.to_string(), &bytes) {
        Ok(()) => {
          self.written.lock().unwrap().insert(chunk_id);
          self.slots.lock().unwrap().remove(&chunk_id);
        }
        Err(e) => {
          warn!("eviction of chunk {chunk_id} failed ({e:#}); keeping resident");
          self
            .slots
            .lock()
            .unwrap()
            .insert(chunk_id, Slot::Resident { refs: 0, cell });
        }
      },
    }
    drop(gate);
  }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
