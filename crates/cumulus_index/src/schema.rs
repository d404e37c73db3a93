//! Point record layout: named dimensions packed into fixed-size records.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{bail, Result};
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Storage class of a dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimKind {
  Signed,
  Unsigned,
  Floating,
}

/// One named dimension within a point record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimInfo {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: DimKind,
  pub size: usize,
}

impl DimInfo {
  pub fn new(name: &str, kind: DimKind, size: usize) -> Self {
    Self {
      name: name.to_string(),
      kind,
      size,
    }
  }
}

/// Dimension names the indexer itself reads or writes.
pub const DIM_X: &str = "X";
pub const DIM_Y: &str = "Y";
pub const DIM_Z: &str = "Z";
pub const DIM_ORIGIN: &str = "Origin";

/// Immutable record layout for one build.
///
/// Record size is fixed per build. X, Y, and Z must be 8-byte floating
/// dimensions and Origin an 8-byte unsigned dimension; everything else
/// (intensity, classification, RGB, ...) passes through untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
  dims: Vec<DimInfo>,
  point_size: usize,
  x_offset: usize,
  y_offset: usize,
  z_offset: usize,
  origin_offset: usize,
}

impl Schema {
  pub fn new(dims: Vec<DimInfo>) -> Result<Self> {
    let mut offsets = [None; 4];
    let mut at = 0;
    for d in &dims {
      if d.size == 0 {
        bail!("dimension {} has zero size", d.name);
      }
      let slot = match d.name.as_str() {
        DIM_X => Some(0),
        DIM_Y => Some(1),
        DIM_Z => Some(2),
        DIM_ORIGIN => Some(3),
        _ => None,
      };
      if let Some(i) = slot {
        let (kind, size) = if i == 3 {
          (DimKind::Unsigned, 8)
        } else {
          (DimKind::Floating, 8)
        };
        if d.kind != kind || d.size != size {
          bail!("dimension {} must be an 8-byte {:?}", d.name, kind);
        }
        offsets[i] = Some(at);
      }
      at += d.size;
    }

    let [x, y, z, origin] = offsets;
    let (Some(x_offset), Some(y_offset), Some(z_offset), Some(origin_offset)) = (x, y, z, origin)
    else {
      bail!("schema requires X, Y, Z and Origin dimensions");
    };

    Ok(Self {
      dims,
      point_size: at,
      x_offset,
      y_offset,
      z_offset,
      origin_offset,
    })
  }

  /// The minimal layout: coordinates plus the origin tag.
  pub fn standard() -> Self {
    Self::new(vec![
      DimInfo::new(DIM_X, DimKind::Floating, 8),
      DimInfo::new(DIM_Y, DimKind::Floating, 8),
      DimInfo::new(DIM_Z, DimKind::Floating, 8),
      DimInfo::new(DIM_ORIGIN, DimKind::Unsigned, 8),
    ])
    .expect("standard schema is well-formed")
  }

  pub fn dims(&self) -> &[DimInfo] {
    &self.dims
  }

  /// Fixed record size in bytes.
  pub fn point_size(&self) -> usize {
    self.point_size
  }

  pub fn offset(&self, name: &str) -> Option<usize> {
    let mut at = 0;
    for d in &self.dims {
      if d.name == name {
        return Some(at);
      }
      at += d.size;
    }
    None
  }

  /// Write the origin id into a packed record.
  #[inline]
  pub fn stamp_origin(&self, record: &mut [u8], origin: u64) {
    record[self.origin_offset..self.origin_offset + 8].copy_from_slice(&origin.to_le_bytes());
  }

  /// Read the origin id back out of a packed record.
  #[inline]
  pub fn origin_of(&self, record: &[u8]) -> u64 {
    u64::from_le_bytes(
      record[self.origin_offset..self.origin_offset + 8]
        .try_into()
        .expect("record too short for Origin"),
    )
  }

  /// Recover the coordinates from a packed record.
  #[inline]
  pub fn point_of(&self, record: &[u8]) -> DVec3 {
    let read = |at: usize| {
      f64::from_le_bytes(record[at..at + 8].try_into().expect("record too short"))
    };
    DVec3::new(
      read(self.x_offset),
      read(self.y_offset),
      read(self.z_offset),
    )
  }

  /// Write the coordinates into a packed record.
  #[inline]
  pub fn set_point(&self, record: &mut [u8], p: DVec3) {
    record[self.x_offset..self.x_offset + 8].copy_from_slice(&p.x.to_le_bytes());
    record[self.y_offset..self.y_offset + 8].copy_from_slice(&p.y.to_le_bytes());
    record[self.z_offset..self.z_offset + 8].copy_from_slice(&p.z.to_le_bytes());
  }

  /// Union with another layout, preserving this schema's dimension order.
  ///
  /// Used when aggregating previews across heterogeneous inputs.
  pub fn merge(&self, other: &Schema) -> Result<Schema> {
    let mut dims = self.dims.clone();
    for d in &other.dims {
      if !dims.iter().any(|have| have.name == d.name) {
        dims.push(d.clone());
      }
    }
    Schema::new(dims)
  }

  /// Stable fingerprint of the layout, embedded in chunk headers so a store
  /// written under one schema is never decoded under another.
  pub fn fingerprint(&self) -> u64 {
    let mut hasher = DefaultHasher::new();
    for d in &self.dims {
      d.hash(&mut hasher);
    }
    hasher.finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_standard_layout() {
    let s = Schema::standard();
    assert_eq!(s.point_size(), 32);
    assert_eq!(s.offset(DIM_X), Some(0));
    assert_eq!(s.offset(DIM_ORIGIN), Some(24));
  }

  #[test]
  fn test_point_roundtrip() {
    let s = Schema::standard();
    let mut record = vec![0u8; s.point_size()];
    let p = DVec3::new(1.5, -2.25, 1e9);

    s.set_point(&mut record, p);
    s.stamp_origin(&mut record, 42);

    assert_eq!(s.point_of(&record), p);
    assert_eq!(s.origin_of(&record), 42);
  }

  #[test]
  fn test_missing_origin_rejected() {
    let dims = vec![
      DimInfo::new(DIM_X, DimKind::Floating, 8),
      DimInfo::new(DIM_Y, DimKind::Floating, 8),
      DimInfo::new(DIM_Z, DimKind::Floating, 8),
    ];
    assert!(Schema::new(dims).is_err());
  }

  #[test]
  fn test_wrong_coordinate_type_rejected() {
    let dims = vec![
      DimInfo::new(DIM_X, DimKind::Signed, 4),
      DimInfo::new(DIM_Y, DimKind::Floating, 8),
      DimInfo::new(DIM_Z, DimKind::Floating, 8),
      DimInfo::new(DIM_ORIGIN, DimKind::Unsigned, 8),
    ];
    assert!(Schema::new(dims).is_err());
  }

  #[test]
  fn test_merge_unions_by_name() {
    let a = Schema::standard();
    let b = Schema::new(vec![
      DimInfo::new(DIM_X, DimKind::Floating, 8),
      DimInfo::new(DIM_Y, DimKind::Floating, 8),
      DimInfo::new(DIM_Z, DimKind::Floating, 8),
      DimInfo::new(DIM_ORIGIN, DimKind::Unsigned, 8),
      DimInfo::new("Intensity", DimKind::Unsigned, 2),
    ])
    .unwrap();

    let merged = a.merge(&b).unwrap();
    assert_eq!(merged.dims().len(), 5);
    assert_eq!(merged.point_size(), 34);
    assert_ne!(merged.fingerprint(), a.fingerprint());
  }
}
