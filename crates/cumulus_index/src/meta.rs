//! The self-describing build metadata document.
//!
//! Written as JSON to the `entwine{postfix}` key at the output endpoint.
//! Everything a later process needs to reopen, continue, or merge the
//! build lives here: bounds, schema, tree shape, manifest, counters, and
//! the id list of every serialized cold chunk.

use anyhow::{Context, Result};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::manifest::FileStatus;
use crate::reader::Reprojection;
use crate::schema::DimInfo;
use crate::stats::StatsSnapshot;
use crate::structure::StructureConfig;

/// Root key of the metadata document; shard metadata appends `-{id}`.
pub const META_KEY: &str = "entwine";

/// Bounds as stored in metadata. Dimensionality lives on the structure
/// block, so only the corners appear here.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundsMeta {
  pub min: [f64; 3],
  pub max: [f64; 3],
}

impl BoundsMeta {
  pub fn from_bounds(b: &Bounds) -> Self {
    Self {
      min: [b.min.x, b.min.y, b.min.z],
      max: [b.max.x, b.max.y, b.max.z],
    }
  }

  pub fn to_bounds(self, is_3d: bool) -> Bounds {
    Bounds::new(
      DVec3::from_array(self.min),
      DVec3::from_array(self.max),
      is_3d,
    )
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDoc {
  pub bbox: BoundsMeta,
  pub schema: Vec<DimInfo>,
  pub structure: StructureConfig,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reprojection: Option<Reprojection>,
  /// Origin paths in id order, with a parallel status array.
  pub manifest: Vec<String>,
  pub manifest_status: Vec<FileStatus>,
  /// WKT string, or empty when unknown.
  pub srs: String,
  pub stats: StatsSnapshot,
  pub compressed: bool,
  pub trust_headers: bool,
  /// Every cold chunk id ever serialized. Present in the root document
  /// after save or merge.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ids: Vec<u64>,
}

impl MetaDoc {
  pub fn parse(text: &str) -> Result<Self> {
    serde_json::from_str(text).context("invalid metadata document")
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string_pretty(self).context("serializing metadata document")
  }
}

/// Metadata key for one shard, or the root key for a whole build.
pub fn meta_key(postfix: &str) -> String {
  format!("{META_KEY}{postfix}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::Schema;
  use crate::structure::Subset;

  fn doc() -> MetaDoc {
    MetaDoc {
      bbox: BoundsMeta {
        min: [-2.0, -2.0, -2.0],
        max: [2.0, 2.0, 2.0],
      },
      schema: Schema::standard().dims().to_vec(),
      structure: StructureConfig {
        null_depth_begin: 0,
        null_depth_end: 1,
        base_depth_begin: 1,
        base_depth_end: 4,
        cold_depth_begin: 4,
        cold_depth_end: 8,
        chunk_points: 4096,
        is_3d: true,
        cell_capacity: 1,
        subset: Some(Subset { id: 2, of: 4 }),
      },
      reprojection: None,
      manifest: vec!["a.xyz".to_string(), "b.xyz".to_string()],
      manifest_status: vec![FileStatus::Inserted, FileStatus::Error],
      srs: String::new(),
      stats: StatsSnapshot {
        num_points: 100,
        num_out_of_bounds: 3,
        num_fall_through: 1,
      },
      compressed: true,
      trust_headers: false,
      ids: vec![585, 4681],
    }
  }

  #[test]
  fn test_roundtrip() {
    let doc = doc();
    let json = doc.to_json().unwrap();
    let back = MetaDoc::parse(&json).unwrap();
    assert_eq!(back, doc);
  }

  #[test]
  fn test_field_names() {
    let json = doc().to_json().unwrap();
    for key in [
      "\"bbox\"",
      "\"schema\"",
      "\"structure\"",
      "\"manifest\"",
      "\"manifestStatus\"",
      "\"srs\"",
      "\"stats\"",
      "\"compressed\"",
      "\"trustHeaders\"",
      "\"ids\"",
      "\"chunkPoints\"",
      "\"nullDepthBegin\"",
      "\"numFallThrough\"",
    ] {
      assert!(json.contains(key), "missing {key} in {json}");
    }
  }

  #[test]
  fn test_meta_keys() {
    assert_eq!(meta_key(""), "entwine");
    assert_eq!(meta_key("-3"), "entwine-3");
  }

  #[test]
  fn test_bounds_meta_conversion() {
    let b = Bounds::new(DVec3::splat(-1.0), DVec3::splat(1.0), false);
    let m = BoundsMeta::from_bounds(&b);
    let back = m.to_bounds(false);
    assert_eq!(back, b);
  }

  #[test]
  fn test_empty_ids_omitted() {
    let mut d = doc();
    d.ids.clear();
    let json = d.to_json().unwrap();
    assert!(!json.contains("\"ids\""));
  }
}
