//! Build configuration: the JSON document produced by `scan` and consumed
//! by `build`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use cumulus_index::{DimInfo, Reprojection, Schema, StructureConfig, Subset};

fn default_threads() -> usize {
	8
}

fn default_tmp() -> String {
	"tmp".to_string()
}

/// Root configuration for one build.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
	/// Input file paths, in origin order.
	pub input: Vec<String>,
	/// Output directory for the tree store.
	pub output: String,
	/// Local staging directory.
	#[serde(default = "default_tmp")]
	pub tmp: String,
	/// Total thread budget, split between ingest and serialization.
	#[serde(default = "default_threads")]
	pub threads: usize,
	/// Global bounds as [minx, miny, minz, maxx, maxy, maxz]; inferred from
	/// the first input when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bounds: Option<[f64; 6]>,
	/// Record layout; the standard XYZ + Origin layout when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schema: Option<Vec<DimInfo>>,
	/// Tree shape; sensible octree defaults when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub structure: Option<StructureConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reprojection: Option<Reprojection>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subset: Option<Subset>,
	#[serde(default)]
	pub compressed: bool,
	#[serde(default)]
	pub trust_headers: bool,
	/// Point total reported by scan; informational.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub num_points: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub srs: Option<String>,
}

impl BuildConfig {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let config: BuildConfig =
			serde_json::from_str(&content).context("failed to parse config JSON")?;

		if config.input.is_empty() {
			anyhow::bail!("config must list at least one input");
		}
		if config.output.is_empty() {
			anyhow::bail!("config must name an output directory");
		}
		Ok(config)
	}

	pub fn schema(&self) -> Result<Schema> {
		match &self.schema {
			Some(dims) => Schema::new(dims.clone()),
			None => Ok(Schema::standard()),
		}
	}

	pub fn structure(&self) -> StructureConfig {
		let mut structure = self.structure.clone().unwrap_or_else(default_structure);
		if self.subset.is_some() {
			structure.subset = self.subset;
		}
		structure
	}
}

/// Octree defaults: six resident depths, four paged depths.
pub fn default_structure() -> StructureConfig {
	StructureConfig {
		null_depth_begin: 0,
		null_depth_end: 0,
		base_depth_begin: 0,
		base_depth_end: 6,
		cold_depth_begin: 6,
		cold_depth_end: 10,
		chunk_points: 4096,
		is_3d: true,
		cell_capacity: 1,
		subset: None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_minimal_config() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(
			&path,
			r#"{ "input": ["a.xyz"], "output": "out" }"#,
		)
		.unwrap();

		let config = BuildConfig::load(&path).unwrap();
		assert_eq!(config.threads, 8);
		assert_eq!(config.tmp, "tmp");
		assert!(config.structure.is_none());
		assert_eq!(config.structure().base_depth_end, 6);
		assert_eq!(config.schema().unwrap(), Schema::standard());
	}

	#[test]
	fn test_empty_input_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, r#"{ "input": [], "output": "out" }"#).unwrap();
		assert!(BuildConfig::load(&path).is_err());
	}

	#[test]
	fn test_subset_overrides_structure() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(
			&path,
			r#"{
				"input": ["a.xyz"],
				"output": "out",
				"structure": {
					"nullDepthBegin": 0, "nullDepthEnd": 1,
					"baseDepthBegin": 1, "baseDepthEnd": 5,
					"coldDepthBegin": 5, "coldDepthEnd": 9,
					"chunkPoints": 512, "is3d": true
				},
				"subset": { "id": 2, "of": 4 }
			}"#,
		)
		.unwrap();

		let config = BuildConfig::load(&path).unwrap();
		let structure = config.structure();
		assert_eq!(structure.subset, Some(Subset { id: 2, of: 4 }));
		assert_eq!(structure.cell_capacity, 1);
	}
}
