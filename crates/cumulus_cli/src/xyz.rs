//! Plain-text XYZ reader: one `x y z [extra...]` line per point.
//!
//! This is the bundled reference reader; format pipelines with real headers
//! (LAS, LAZ, ...) implement the same trait out of tree. ASCII files carry
//! no header, so previews are unavailable and bounds always come from a
//! full read.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use glam::DVec3;
use tracing::warn;

use cumulus_index::{PointBatch, PointReader, Preview, Reprojection, Schema};

const BATCH_POINTS: usize = 4096;

pub struct XyzReader {
	schema: Schema,
}

impl XyzReader {
	pub fn new(schema: Schema) -> Self {
		Self { schema }
	}

	fn parse_line(line: &str) -> Option<DVec3> {
		let mut fields = line.split_whitespace();
		let x = fields.next()?.parse().ok()?;
		let y = fields.next()?.parse().ok()?;
		let z = fields.next()?.parse().ok()?;
		Some(DVec3::new(x, y, z))
	}
}

impl PointReader for XyzReader {
	fn good(&self, path: &str) -> bool {
		Path::new(path).is_file()
	}

	fn preview(&self, _path: &Path, _reprojection: Option<&Reprojection>) -> Option<Preview> {
		// No header to trust.
		None
	}

	fn run(
		&self,
		path: &Path,
		_reprojection: Option<&Reprojection>,
		sink: &mut dyn FnMut(PointBatch),
	) -> bool {
		let file = match File::open(path) {
			Ok(f) => f,
			Err(e) => {
				warn!("cannot open {}: {e}", path.display());
				return false;
			}
		};

		let stride = self.schema.point_size();
		let mut record = vec![0u8; stride];
		let mut batch = PointBatch::with_capacity(stride, BATCH_POINTS);

		for line in BufReader::new(file).lines() {
			let line = match line {
				Ok(l) => l,
				Err(e) => {
					warn!("read error in {}: {e}", path.display());
					return false;
				}
			};
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			let Some(p) = Self::parse_line(trimmed) else {
				warn!("malformed line in {}: {trimmed:?}", path.display());
				return false;
			};

			record.fill(0);
			self.schema.set_point(&mut record, p);
			batch.push(p, &record);

			if batch.len() >= BATCH_POINTS {
				sink(std::mem::replace(
					&mut batch,
					PointBatch::with_capacity(stride, BATCH_POINTS),
				));
			}
		}

		if !batch.is_empty() {
			sink(batch);
		}
		true
	}
}
