//! PointInfo - an accepted point and its packed dimension record.

use glam::DVec3;

/// A point paired with its schema-packed record bytes.
///
/// Exactly one chunk slot owns a `PointInfo` at any time; a rejected insert
/// hands it back to the caller for a retry at a deeper node, and the record
/// buffer is recycled through the [`crate::pool::PointPool`] when the point
/// is discarded.
#[derive(Debug)]
pub struct PointInfo {
  pub point: DVec3,
  pub data: Box<[u8]>,
}

impl PointInfo {
  pub fn new(point: DVec3, data: Box<[u8]>) -> Self {
    Self { point, data }
  }
}
