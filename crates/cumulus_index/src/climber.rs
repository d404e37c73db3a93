//! Climber - stateful descent from the root toward a target point.

use glam::DVec3;

use crate::bounds::Bounds;
use crate::structure::Structure;

/// A single walk down the implicit tree.
///
/// Climbers are cheap value types: every insert builds one from the global
/// bounds and magnifies it until a chunk accepts the point or the terminal
/// depth is reached. They are never shared between points or threads.
#[derive(Clone, Debug)]
pub struct Climber<'s> {
  structure: &'s Structure,
  bounds: Bounds,
  depth: u32,
  node_id: u64,
}

impl<'s> Climber<'s> {
  pub fn new(bounds: Bounds, structure: &'s Structure) -> Self {
    Self {
      structure,
      bounds,
      depth: 0,
      node_id: 0,
    }
  }

  #[inline]
  pub fn depth(&self) -> u32 {
    self.depth
  }

  #[inline]
  pub fn node_id(&self) -> u64 {
    self.node_id
  }

  #[inline]
  pub fn bounds(&self) -> &Bounds {
    &self.bounds
  }

  /// Step into the child cell containing `p`.
  ///
  /// Splits on x/y/z octants for octrees, x/y quadrants for quadtrees. A
  /// point on a splitting plane descends into the lower cell.
  pub fn magnify(&mut self, p: DVec3) {
    let child = self.bounds.child_index(p);
    let b = self.structure.branching();

    let parent_begin = self.structure.level_begin(self.depth);
    let child_begin = self.structure.level_begin(self.depth + 1);

    self.node_id = child_begin + (self.node_id - parent_begin) * b + child as u64;
    self.bounds = self.bounds.child(child);
    self.depth += 1;
  }
}
