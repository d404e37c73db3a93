//! Chunk - in-memory point buckets for contiguous node-id ranges.
//!
//! Two variants exist and no others are planned: the base chunk is a dense
//! slot array covering every shallow-depth id and stays resident for the
//! whole build; cold chunks are sparse maps over one chunk-span of deep ids
//! and page in and out through the registry.
//!
//! Both serialize deterministically: the base chunk as a header plus a
//! presence bitmap plus records in id order, cold chunks as
//! `(varint local id, record)` entries in local-id order. Payloads are
//! optionally wrapped in an lz4 frame, selected once per build.

use anyhow::{bail, Context, Result};
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::point::PointInfo;
use crate::schema::Schema;
use crate::structure::Structure;

/// Append a LEB128-encoded unsigned integer.
fn write_varint(out: &mut Vec<u8>, mut v: u64) {
  loop {
    let byte = (v & 0x7f) as u8;
    v >>= 7;
    if v == 0 {
      out.push(byte);
      return;
    }
    out.push(byte | 0x80);
  }
}

/// Decode a LEB128-encoded unsigned integer, advancing `at`.
fn read_varint(bytes: &[u8], at: &mut usize) -> Result<u64> {
  let mut v = 0u64;
  let mut shift = 0u32;
  loop {
    let Some(&byte) = bytes.get(*at) else {
      bail!("truncated varint");
    };
    *at += 1;
    if shift >= 64 || (shift == 63 && byte > 1) {
      bail!("varint overflows 64 bits");
    }
    v |= u64::from(byte & 0x7f) << shift;
    if byte & 0x80 == 0 {
      return Ok(v);
    }
    shift += 7;
  }
}

fn frame(payload: Vec<u8>, compressed: bool) -> Vec<u8> {
  if compressed {
    lz4_flex::compress_prepend_size(&payload)
  } else {
    payload
  }
}

fn unframe(bytes: Vec<u8>, compressed: bool) -> Result<Vec<u8>> {
  if compressed {
    lz4_flex::decompress_size_prepended(&bytes).context("corrupt lz4 frame")
  } else {
    Ok(bytes)
  }
}

// =============================================================================
// BaseChunk
// =============================================================================

/// The permanently-resident chunk for the base depth range.
///
/// One slot per node id, indexed by `node_id - base_index_begin`.
pub struct BaseChunk {
  begin: u64,
  slots: Vec<Option<PointInfo>>,
}

impl BaseChunk {
  pub fn new(structure: &Structure) -> Self {
    let span = structure.base_index_span() as usize;
    let mut slots = Vec::with_capacity(span);
    slots.resize_with(span, || None);
    Self {
      begin: structure.base_index_begin(),
      slots,
    }
  }

  /// Offer a point to the slot for `node_id`. Returns the point back when
  /// the slot is already taken.
  pub fn insert(&mut self, node_id: u64, info: PointInfo) -> Option<PointInfo> {
    let slot = &mut self.slots[(node_id - self.begin) as usize];
    match slot {
      Some(_) => Some(info),
      None => {
        *slot = Some(info);
        None
      }
    }
  }

  pub fn num_points(&self) -> u64 {
    self.slots.iter().filter(|s| s.is_some()).count() as u64
  }

  /// Occupied slots in id order.
  pub fn iter(&self) -> impl Iterator<Item = (u64, &PointInfo)> {
    self
      .slots
      .iter()
      .enumerate()
      .filter_map(move |(i, s)| s.as_ref().map(|info| (self.begin + i as u64, info)))
  }

  /// Take ownership of every point in `other`.
  ///
  /// Shards store disjoint node ids, so a collision means the store is
  /// corrupt or two shards overlapped; fail loudly.
  pub fn merge(&mut self, other: BaseChunk) {
    assert_eq!(self.begin, other.begin, "base chunks cover different ranges");
    assert_eq!(self.slots.len(), other.slots.len());
    for (i, slot) in other.slots.into_iter().enumerate() {
      if let Some(info) = slot {
        assert!(
          self.slots[i].is_none(),
          "base slot {} occupied in two segments",
          self.begin + i as u64
        );
        self.slots[i] = Some(info);
      }
    }
  }

  pub fn serialize(&self, schema: &Schema, compressed: bool) -> Vec<u8> {
    let record_size = schema.point_size();
    let span = self.slots.len();
    let bitmap_len = span.div_ceil(8);

    let mut payload = Vec::with_capacity(16 + bitmap_len + self.num_points() as usize * record_size);
    payload.extend_from_slice(&schema.fingerprint().to_le_bytes());
    payload.extend_from_slice(&self.num_points().to_le_bytes());

    let mut bitmap = vec![0u8; bitmap_len];
    for (i, slot) in self.slots.iter().enumerate() {
      if slot.is_some() {
        bitmap[i / 8] |= 1 << (i % 8);
      }
    }
    payload.extend_from_slice(&bitmap);

    for slot in self.slots.iter().flatten() {
      payload.extend_from_slice(&slot.data);
    }

    frame(payload, compressed)
  }

  pub fn deserialize(
    structure: &Structure,
    schema: &Schema,
    compressed: bool,
    bytes: Vec<u8>,
  ) -> Result<Self> {
    let payload = unframe(bytes, compressed)?;
    let record_size = schema.point_size();
    let span = structure.base_index_span() as usize;
    let bitmap_len = span.div_ceil(8);

    if payload.len() < 16 + bitmap_len {
      bail!("base chunk payload truncated");
    }
    let fingerprint = u64::from_le_bytes(payload[0..8].try_into().unwrap());
    if fingerprint != schema.fingerprint() {
      bail!("base chunk was written under a different schema");
    }
    let count = u64::from_le_bytes(payload[8..16].try_into().unwrap()) as usize;
    let bitmap = &payload[16..16 + bitmap_len];

    let mut at = 16 + bitmap_len;
    let mut chunk = Self {
      begin: structure.base_index_begin(),
      slots: {
        let mut v = Vec::with_capacity(span);
        v.resize_with(span, || None);
        v
      },
    };

    let mut seen = 0usize;
    for i in 0..span {
      if bitmap[i / 8] & (1 << (i % 8)) == 0 {
        continue;
      }
      let Some(record) = payload.get(at..at + record_size) else {
        bail!("base chunk record truncated at slot {}", i);
      };
      at += record_size;
      seen += 1;
      let data: Box<[u8]> = record.into();
      chunk.slots[i] = Some(PointInfo::new(schema.point_of(&data), data));
    }

    if seen != count {
      bail!("base chunk count mismatch: header {} bitmap {}", count, seen);
    }
    Ok(chunk)
  }
}

// =============================================================================
// SparseChunk
// =============================================================================

/// A paged bucket for one chunk-span of cold node ids.
///
/// Cells are keyed by `node_id - chunk_id` and hold up to the structure's
/// per-node capacity; a full cell rejects the insert so the caller retries
/// one depth deeper.
pub struct SparseChunk {
  id: u64,
  span: u64,
  cell_capacity: usize,
  cells: BTreeMap<u64, SmallVec<[PointInfo; 1]>>,
}

impl SparseChunk {
  pub fn new(id: u64, structure: &Structure) -> Self {
    Self {
      id,
      span: structure.chunk_span(),
      cell_capacity: structure.cell_capacity(),
      cells: BTreeMap::new(),
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  /// Offer a point to the cell for `local_id`, handing it back on a full
  /// cell.
  pub fn insert(&mut self, local_id: u64, info: PointInfo) -> Option<PointInfo> {
    debug_assert!(local_id < self.span);
    let cell = self.cells.entry(local_id).or_default();
    if cell.len() < self.cell_capacity {
      cell.push(info);
      None
    } else {
      Some(info)
    }
  }

  pub fn num_points(&self) -> u64 {
    self.cells.values().map(|c| c.len() as u64).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  /// Entries in (local id, slot) order.
  pub fn iter(&self) -> impl Iterator<Item = (u64, &PointInfo)> {
    self
      .cells
      .iter()
      .flat_map(|(&local, cell)| cell.iter().map(move |info| (local, info)))
  }

  /// Take ownership of every point in `other`. Shard ranges are disjoint,
  /// so overflowing a cell here means overlapping shards; fail loudly.
  pub fn merge(&mut self, other: SparseChunk) {
    assert_eq!(self.id, other.id, "merging chunks with different ids");
    for (local, cell) in other.cells {
      for info in cell {
        assert!(
          self.insert(local, info).is_none(),
          "cell {} overflowed while merging chunk {}",
          local,
          self.id
        );
      }
    }
  }

  pub fn serialize(&self, schema: &Schema, compressed: bool) -> Vec<u8> {
    let record_size = schema.point_size();
    let mut payload = Vec::with_capacity(self.cells.len() * (record_size + 2));
    for (local, info) in self.iter() {
      write_varint(&mut payload, local);
      debug_assert_eq!(info.data.len(), record_size);
      payload.extend_from_slice(&info.data);
    }
    frame(payload, compressed)
  }

  pub fn deserialize(
    id: u64,
    structure: &Structure,
    schema: &Schema,
    compressed: bool,
    bytes: Vec<u8>,
  ) -> Result<Self> {
    let payload = unframe(bytes, compressed)?;
    let record_size = schema.point_size();
    let mut chunk = Self::new(id, structure);

    let mut at = 0usize;
    while at < payload.len() {
      let local = read_varint(&payload, &mut at)?;
      if local >= chunk.span {
        bail!("local id {} outside chunk span {}", local, chunk.span);
      }
      let Some(record) = payload.get(at..at + record_size) else {
        bail!("cold chunk record truncated");
      };
      at += record_size;
      let data: Box<[u8]> = record.into();
      let info = PointInfo::new(schema.point_of(&data), data);
      chunk.cells.entry(local).or_default().push(info);
    }
    Ok(chunk)
  }
}

#[cfg(test)]
#[path = "chunk_test.rs"]
mod chunk_test;
