//! Structure - pure-arithmetic node addressing for the implicit tree.
//!
//! Node ids are dense integers laid out level by level: the root is id 0,
//! and level `d` occupies `[level_begin(d), level_begin(d + 1))` where
//! `level_begin(d) = (b^d - 1) / (b - 1)` for branching factor `b` (8 for
//! octrees, 4 for quadtrees). No explicit tree nodes exist anywhere;
//! parent/child relationships are coordinate math on ids.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use glam::DVec3;

/// One shard of a partitioned build: this builder owns shard `id` of `of`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
  pub id: u64,
  pub of: u64,
}

fn default_cell_capacity() -> usize {
  1
}

/// Declarative tree shape, as written to and read from build metadata.
///
/// Depth ranges are contiguous: the null range (no storage, descent only)
/// runs into the base range (one permanently-resident chunk) which runs
/// into the cold range (paged sparse chunks).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureConfig {
  pub null_depth_begin: u32,
  pub null_depth_end: u32,
  pub base_depth_begin: u32,
  pub base_depth_end: u32,
  pub cold_depth_begin: u32,
  pub cold_depth_end: u32,
  /// Number of node ids spanned by one cold chunk.
  pub chunk_points: u64,
  #[serde(rename = "is3d")]
  pub is_3d: bool,
  /// Points accepted per node before an insert is pushed deeper.
  #[serde(default = "default_cell_capacity")]
  pub cell_capacity: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subset: Option<Subset>,
}

/// Validated addressing scheme with precomputed level offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
  cfg: StructureConfig,
  level_begins: Vec<u64>,
  base_index_begin: u64,
  base_index_end: u64,
  cold_index_begin: u64,
  cold_index_end: u64,
}

impl Structure {
  pub fn new(cfg: StructureConfig) -> Result<Self> {
    if cfg.null_depth_begin != 0 {
      bail!("null depths must begin at the root");
    }
    if cfg.null_depth_end < cfg.null_depth_begin
      || cfg.base_depth_begin != cfg.null_depth_end
      || cfg.base_depth_end < cfg.base_depth_begin
      || cfg.cold_depth_begin != cfg.base_depth_end
      || cfg.cold_depth_end <= cfg.cold_depth_begin
    {
      bail!("depth ranges must be contiguous and non-inverted");
    }
    if cfg.cell_capacity == 0 {
      bail!("cell capacity must be at least 1");
    }

    let b = if cfg.is_3d { 8u64 } else { 4u64 };

    if cfg.chunk_points == 0 || !is_power_of(cfg.chunk_points, b) {
      bail!(
        "chunk span {} must be a power of the branching factor {}",
        cfg.chunk_points,
        b
      );
    }

    let mut level_begins = Vec::with_capacity(cfg.cold_depth_end as usize + 1);
    let mut begin = 0u64;
    let mut width = 1u64;
    for _ in 0..=cfg.cold_depth_end {
      level_begins.push(begin);
      begin = begin
        .checked_add(width)
        .filter(|_| width <= u64::MAX / b)
        .ok_or_else(|| anyhow::anyhow!("tree too deep for 64-bit node ids"))?;
      width *= b;
    }

    let shard_depth = match cfg.subset {
      Some(s) => {
        let m = subset_depth(s.of)
          .ok_or_else(|| anyhow::anyhow!("subset count {} must be a power of four", s.of))?;
        if s.id >= s.of {
          bail!("subset id {} out of range of {}", s.id, s.of);
        }
        if cfg.base_depth_begin < m {
          bail!("subset builds need {} null depths before storage begins", m);
        }
        m
      }
      None => 0,
    };

    // A chunk span must never straddle two shard subtrees (or two levels):
    // the block of ids under one depth-`m` ancestor at the first cold depth
    // has to be a whole multiple of the span.
    let block_levels = cfg.cold_depth_begin - shard_depth;
    let block = b
      .checked_pow(block_levels)
      .ok_or_else(|| anyhow::anyhow!("tree too deep for 64-bit node ids"))?;
    if block < cfg.chunk_points {
      bail!(
        "chunk span {} exceeds the {} ids per subtree at the first cold depth",
        cfg.chunk_points,
        block
      );
    }

    let base_index_begin = level_begins[cfg.base_depth_begin as usize];
    let base_index_end = level_begins[cfg.base_depth_end as usize];
    let cold_index_begin = level_begins[cfg.cold_depth_begin as usize];
    let cold_index_end = level_begins[cfg.cold_depth_end as usize];

    Ok(Self {
      cfg,
      level_begins,
      base_index_begin,
      base_index_end,
      cold_index_begin,
      cold_index_end,
    })
  }

  pub fn config(&self) -> &StructureConfig {
    &self.cfg
  }

  #[inline]
  pub fn is_3d(&self) -> bool {
    self.cfg.is_3d
  }

  /// Children per node: 8 for octrees, 4 for quadtrees.
  #[inline]
  pub fn branching(&self) -> u64 {
    if self.cfg.is_3d {
      8
    } else {
      4
    }
  }

  #[inline]
  pub fn level_begin(&self, depth: u32) -> u64 {
    self.level_begins[depth as usize]
  }

  #[inline]
  pub fn base_depth_begin(&self) -> u32 {
    self.cfg.base_depth_begin
  }

  #[inline]
  pub fn cold_depth_end(&self) -> u32 {
    self.cfg.cold_depth_end
  }

  #[inline]
  pub fn base_index_begin(&self) -> u64 {
    self.base_index_begin
  }

  #[inline]
  pub fn base_index_end(&self) -> u64 {
    self.base_index_end
  }

  /// Number of slots in the base chunk.
  #[inline]
  pub fn base_index_span(&self) -> u64 {
    self.base_index_end - self.base_index_begin
  }

  #[inline]
  pub fn cold_index_begin(&self) -> u64 {
    self.cold_index_begin
  }

  #[inline]
  pub fn cold_index_end(&self) -> u64 {
    self.cold_index_end
  }

  #[inline]
  pub fn chunk_span(&self) -> u64 {
    self.cfg.chunk_points
  }

  #[inline]
  pub fn cell_capacity(&self) -> usize {
    self.cfg.cell_capacity
  }

  #[inline]
  pub fn is_null(&self, node_id: u64) -> bool {
    node_id < self.base_index_begin
  }

  #[inline]
  pub fn is_base(&self, node_id: u64) -> bool {
    node_id >= self.base_index_begin && node_id < self.base_index_end
  }

  /// Id of the cold chunk holding `node_id`.
  #[inline]
  pub fn chunk_id_for(&self, node_id: u64) -> u64 {
    debug_assert!(node_id >= self.cold_index_begin && node_id < self.cold_index_end);
    let span = self.cfg.chunk_points;
    self.cold_index_begin + ((node_id - self.cold_index_begin) / span) * span
  }

  pub fn subset(&self) -> Option<Subset> {
    self.cfg.subset
  }

  /// Stable tag appended to per-shard artifact keys: `"-{id}"`, or empty
  /// for whole builds.
  pub fn subset_postfix(&self) -> String {
    match self.cfg.subset {
      Some(s) => format!("-{}", s.id),
      None => String::new(),
    }
  }

  /// Clear the shard marker after a merge has unified the output.
  pub fn make_whole(&mut self) {
    self.cfg.subset = None;
  }

  /// The spatial cell this shard owns, as a box. The split is always on x
  /// and y, one 2x2 level per factor of four.
  ///
  /// The box is only suitable for coarse overlap tests; exact membership on
  /// split planes is decided by [`Structure::subset_owns`], which shares the
  /// climber's tie-break.
  pub fn subset_bounds(&self, global: &Bounds) -> Option<Bounds> {
    let s = self.cfg.subset?;
    let m = subset_depth(s.of).expect("validated at construction");
    let mut b = *global;
    for level in (0..m).rev() {
      let q = ((s.id >> (2 * level)) & 3) as u8;
      b = b.quadrant_xy(q);
    }
    Some(b)
  }

  /// Whether this shard owns `p` under the climber's plane tie-break.
  pub fn subset_owns(&self, global: &Bounds, p: DVec3) -> bool {
    let Some(s) = self.cfg.subset else {
      return true;
    };
    let m = subset_depth(s.of).expect("validated at construction");
    let mut b = *global;
    for level in (0..m).rev() {
      let q = (b.child_index(p) & 3) as u64;
      if q != (s.id >> (2 * level)) & 3 {
        return false;
      }
      b = b.quadrant_xy(q as u8);
    }
    true
  }
}

/// Number of 2x2 split levels for a shard count, or None when the count is
/// not a power of four.
fn subset_depth(of: u64) -> Option<u32> {
  if of < 4 {
    return None;
  }
  let mut v = of;
  let mut m = 0;
  while v > 1 {
    if v % 4 != 0 {
      return None;
    }
    v /= 4;
    m += 1;
  }
  Some(m)
}

fn is_power_of(mut v: u64, base: u64) -> bool {
  while v > 1 {
    if v % base != 0 {
      return false;
    }
    v /= base;
  }
  v == 1
}

#[cfg(test)]
#[path = "structure_test.rs"]
mod structure_test;
