//! Reader seam - the format pipeline is an external collaborator.
//!
//! The indexer never decodes point formats itself. A [`PointReader`] hands
//! over batches of `(coordinates, packed record)` pairs already laid out
//! for the build schema, plus a cheap header preview used for bounds
//! inference and fast out-of-bounds skips.

use std::path::Path;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;

/// SRS pair handed through to the reader; the indexer itself never
/// transforms coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reprojection {
  #[serde(rename = "in")]
  pub in_srs: String,
  #[serde(rename = "out")]
  pub out_srs: String,
}

/// Header-derived description of an input file.
#[derive(Clone, Debug, Default)]
pub struct Preview {
  pub num_points: u64,
  pub bounds: Option<Bounds>,
  pub srs: String,
  pub dim_names: Vec<String>,
  pub scale: Option<DVec3>,
}

/// A run of points sharing one record stride.
pub struct PointBatch {
  stride: usize,
  points: Vec<DVec3>,
  data: Vec<u8>,
}

impl PointBatch {
  pub fn new(stride: usize) -> Self {
    assert!(stride > 0);
    Self {
      stride,
      points: Vec::new(),
      data: Vec::new(),
    }
  }

  pub fn with_capacity(stride: usize, points: usize) -> Self {
    Self {
      stride,
      points: Vec::with_capacity(points),
      data: Vec::with_capacity(points * stride),
    }
  }

  pub fn push(&mut self, point: DVec3, record: &[u8]) {
    assert_eq!(record.len(), self.stride, "record does not match batch stride");
    self.points.push(point);
    self.data.extend_from_slice(record);
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (DVec3, &[u8])> {
    self
      .points
      .iter()
      .zip(self.data.chunks_exact(self.stride))
      .map(|(&p, record)| (p, record))
  }
}

/// External point-format reader.
pub trait PointReader: Send + Sync {
  /// Cheap openability check; a false here records the path as omitted.
  fn good(&self, path: &str) -> bool;

  /// Header preview, when the format supports one.
  fn preview(&self, path: &Path, reprojection: Option<&Reprojection>) -> Option<Preview>;

  /// Stream every point through `sink`. Returns false on read failure.
  fn run(
    &self,
    path: &Path,
    reprojection: Option<&Reprojection>,
    sink: &mut dyn FnMut(PointBatch),
  ) -> bool;
}

/// Blanket impl for boxed readers.
impl PointReader for Box<dyn PointReader> {
  fn good(&self, path: &str) -> bool {
    (**self).good(path)
  }

  fn preview(&self, path: &Path, reprojection: Option<&Reprojection>) -> Option<Preview> {
    (**self).preview(path, reprojection)
  }

  fn run(
    &self,
    path: &Path,
    reprojection: Option<&Reprojection>,
    sink: &mut dyn FnMut(PointBatch),
  ) -> bool {
    (**self).run(path, reprojection, sink)
  }
}
