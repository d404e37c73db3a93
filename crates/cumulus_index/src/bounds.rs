//! Axis-aligned bounding box with double precision for geospatial extents.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Double-precision axis-aligned bounding box.
///
/// Carries a 2D/3D flag: quadtree builds bound only x and y, and their z
/// extent is widened lazily as points arrive (see [`Range`]).
///
/// A freshly constructed "expander" box has `min = +inf, max = -inf` and
/// absorbs any point grown into it. Every non-expander box keeps
/// `min <= max` component-wise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
  /// Minimum corner (inclusive).
  pub min: DVec3,
  /// Maximum corner (inclusive).
  pub max: DVec3,
  /// True for octree extents, false for quadtree extents.
  pub is_3d: bool,
}

impl Bounds {
  /// Create a new box from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: DVec3, max: DVec3, is_3d: bool) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "bounds min must be <= max on all axes"
    );
    Self { min, max, is_3d }
  }

  /// The absorbing sentinel: grows around any point fed to it.
  pub fn expander(is_3d: bool) -> Self {
    Self {
      min: DVec3::splat(f64::INFINITY),
      max: DVec3::splat(f64::NEG_INFINITY),
      is_3d,
    }
  }

  /// True once at least one point has been absorbed (or the box was built
  /// from real corners).
  pub fn exists(&self) -> bool {
    self.min.x <= self.max.x
  }

  /// Check containment. 2D boxes ignore the z component.
  #[inline]
  pub fn contains(&self, p: DVec3) -> bool {
    let xy = p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y;
    if self.is_3d {
      xy && p.z >= self.min.z && p.z <= self.max.z
    } else {
      xy
    }
  }

  /// Check if this box overlaps another on the bounded axes.
  #[inline]
  pub fn overlaps(&self, other: &Bounds) -> bool {
    let xy = self.min.x <= other.max.x
      && self.max.x >= other.min.x
      && self.min.y <= other.max.y
      && self.max.y >= other.min.y;
    if self.is_3d && other.is_3d {
      xy && self.min.z <= other.max.z && self.max.z >= other.min.z
    } else {
      xy
    }
  }

  /// Absorb a point, widening the box as needed.
  pub fn grow(&mut self, p: DVec3) {
    self.min = self.min.min(p);
    self.max = self.max.max(p);
  }

  /// Absorb another box.
  pub fn grow_bounds(&mut self, other: &Bounds) {
    if other.exists() {
      self.min = self.min.min(other.min);
      self.max = self.max.max(other.max);
    }
  }

  /// Widen the z extent to cover the given range.
  pub fn grow_z(&mut self, range: Range) {
    if range.exists() {
      self.min.z = self.min.z.min(range.min);
      self.max.z = self.max.z.max(range.max);
    }
  }

  /// Round outward to integral corners.
  pub fn snapped(&self) -> Self {
    Self {
      min: self.min.floor(),
      max: self.max.ceil(),
      is_3d: self.is_3d,
    }
  }

  #[inline]
  pub fn center(&self) -> DVec3 {
    (self.min + self.max) * 0.5
  }

  #[inline]
  pub fn size(&self) -> DVec3 {
    self.max - self.min
  }

  /// Narrow to the child cell for a branch index.
  ///
  /// Bit 0 selects the upper x half, bit 1 upper y, bit 2 upper z. 2D boxes
  /// ignore bit 2 and keep their z extent.
  pub fn child(&self, index: u8) -> Self {
    let c = self.center();
    let mut out = *self;
    if index & 1 != 0 {
      out.min.x = c.x;
    } else {
      out.max.x = c.x;
    }
    if index & 2 != 0 {
      out.min.y = c.y;
    } else {
      out.max.y = c.y;
    }
    if self.is_3d {
      if index & 4 != 0 {
        out.min.z = c.z;
      } else {
        out.max.z = c.z;
      }
    }
    out
  }

  /// Narrow to an x/y quadrant (bit 0 upper x, bit 1 upper y), keeping the
  /// z extent regardless of dimensionality. Used for shard geometry.
  pub fn quadrant_xy(&self, index: u8) -> Self {
    let c = self.center();
    let mut out = *self;
    if index & 1 != 0 {
      out.min.x = c.x;
    } else {
      out.max.x = c.x;
    }
    if index & 2 != 0 {
      out.min.y = c.y;
    } else {
      out.max.y = c.y;
    }
    out
  }

  /// Branch index of the child cell owning `p`.
  ///
  /// A point on a splitting plane belongs to the lower half: only a
  /// strictly greater coordinate selects the upper cell.
  #[inline]
  pub fn child_index(&self, p: DVec3) -> u8 {
    let c = self.center();
    let mut index = 0u8;
    if p.x > c.x {
      index |= 1;
    }
    if p.y > c.y {
      index |= 2;
    }
    if self.is_3d && p.z > c.z {
      index |= 4;
    }
    index
  }
}

/// One-dimensional expander used to track the z spread of quadtree ingests.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
  pub min: f64,
  pub max: f64,
}

impl Range {
  pub fn expander() -> Self {
    Self {
      min: f64::INFINITY,
      max: f64::NEG_INFINITY,
    }
  }

  pub fn exists(&self) -> bool {
    self.min <= self.max
  }

  pub fn grow(&mut self, v: f64) {
    self.min = self.min.min(v);
    self.max = self.max.max(v);
  }

  /// Round outward to integral endpoints.
  pub fn snapped(&self) -> Self {
    Self {
      min: self.min.floor(),
      max: self.max.ceil(),
    }
  }
}

impl Default for Range {
  fn default() -> Self {
    Self::expander()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_contains_3d() {
    let b = Bounds::new(DVec3::ZERO, DVec3::splat(10.0), true);

    assert!(b.contains(DVec3::splat(5.0)));
    assert!(b.contains(DVec3::ZERO));
    assert!(b.contains(DVec3::splat(10.0)));
    assert!(!b.contains(DVec3::new(5.0, 5.0, 11.0)));
  }

  #[test]
  fn test_contains_2d_ignores_z() {
    let b = Bounds::new(DVec3::ZERO, DVec3::new(10.0, 10.0, 0.0), false);
    assert!(b.contains(DVec3::new(5.0, 5.0, 1000.0)));
    assert!(!b.contains(DVec3::new(11.0, 5.0, 0.0)));
  }

  #[test]
  fn test_expander_absorbs() {
    let mut b = Bounds::expander(true);
    assert!(!b.exists());

    b.grow(DVec3::new(1.0, 2.0, 3.0));
    b.grow(DVec3::new(-1.0, 0.0, 9.0));

    assert!(b.exists());
    assert_eq!(b.min, DVec3::new(-1.0, 0.0, 3.0));
    assert_eq!(b.max, DVec3::new(1.0, 2.0, 9.0));
  }

  #[test]
  fn test_child_octants_partition() {
    let b = Bounds::new(DVec3::splat(-2.0), DVec3::splat(2.0), true);

    for index in 0u8..8 {
      let child = b.child(index);
      assert_eq!(child.size(), DVec3::splat(2.0));
      // The child's own center must map back to the same index.
      assert_eq!(b.child_index(child.center()), index);
    }
  }

  #[test]
  fn test_midpoint_belongs_to_lower_child() {
    let b = Bounds::new(DVec3::splat(-2.0), DVec3::splat(2.0), true);
    assert_eq!(b.child_index(DVec3::ZERO), 0);
    assert_eq!(b.child_index(DVec3::new(0.1, 0.0, 0.0)), 1);
  }

  #[test]
  fn test_quadtree_child_keeps_z() {
    let b = Bounds::new(DVec3::new(0.0, 0.0, -5.0), DVec3::new(8.0, 8.0, 5.0), false);
    let child = b.child(3);
    assert_eq!(child.min, DVec3::new(4.0, 4.0, -5.0));
    assert_eq!(child.max, DVec3::new(8.0, 8.0, 5.0));
  }

  #[test]
  fn test_grow_z() {
    let mut b = Bounds::new(DVec3::ZERO, DVec3::new(4.0, 4.0, 0.0), false);
    let mut r = Range::expander();
    r.grow(-3.2);
    r.grow(7.9);
    b.grow_z(r.snapped());
    assert_eq!(b.min.z, -4.0);
    assert_eq!(b.max.z, 8.0);
  }

  #[test]
  fn test_snapped_rounds_outward() {
    let b = Bounds::new(DVec3::new(0.3, -0.7, 1.5), DVec3::new(2.2, 3.8, 4.1), true).snapped();
    assert_eq!(b.min, DVec3::new(0.0, -1.0, 1.0));
    assert_eq!(b.max, DVec3::new(3.0, 4.0, 5.0));
  }
}
