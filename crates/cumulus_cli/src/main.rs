//! cumulus - point-cloud tree builder.
//!
//! `scan` previews inputs into a build configuration, `build` ingests them
//! into a chunked tree store, and `merge` unifies subset builds:
//!
//! ```text
//! cumulus scan *.xyz -o config.json
//! cumulus build config.json
//! cumulus merge out/
//! ```

mod config;
mod xyz;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::DVec3;
use rayon::prelude::*;

use cumulus_index::endpoint::is_remote_path;
use cumulus_index::{
	Bounds, Builder, BuilderOptions, DirectoryEndpoint, Endpoint, PointReader, Schema,
};

use config::BuildConfig;
use xyz::XyzReader;

/// Point-cloud tree builder.
#[derive(Parser, Debug)]
#[command(name = "cumulus")]
#[command(about = "Index point clouds into a chunked spatial tree")]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Preview inputs and write a build configuration.
	Scan {
		/// Input files.
		#[arg(required = true)]
		input: Vec<String>,

		/// Where to write the configuration.
		#[arg(short, long, default_value = "config.json")]
		output: PathBuf,

		/// Output directory recorded in the configuration.
		#[arg(long, default_value = "out")]
		build_output: String,
	},

	/// Build a tree store from a configuration.
	Build {
		/// Path to a configuration produced by scan (or written by hand).
		config: PathBuf,

		/// Continue a previously saved build at the same output.
		#[arg(long)]
		resume: bool,
	},

	/// Merge subset builds at an output directory into a unified store.
	Merge {
		/// The shared output directory of the subset builds.
		output: String,
	},
}

fn main() -> Result<()> {
	tracing_subscriber::fmt().with_target(false).init();

	match Args::parse().command {
		Command::Scan {
			input,
			output,
			build_output,
		} => cmd_scan(input, &output, build_output),
		Command::Build { config, resume } => cmd_build(&config, resume),
		Command::Merge { output } => cmd_merge(&output),
	}
}

fn cmd_scan(input: Vec<String>, output: &Path, build_output: String) -> Result<()> {
	let reader = XyzReader::new(Schema::standard());

	println!("Scanning {} inputs...", input.len());

	let results: Vec<(u64, Bounds)> = input
		.par_iter()
		.map(|path| {
			let mut bounds = Bounds::expander(true);
			let mut num_points = 0u64;
			let ok = reader.run(Path::new(path), None, &mut |batch| {
				num_points += batch.len() as u64;
				for (p, _) in batch.iter() {
					bounds.grow(p);
				}
			});
			if !ok {
				println!("  skipping unreadable {path}");
				return (0, Bounds::expander(true));
			}
			println!("  {path}: {num_points} points");
			(num_points, bounds)
		})
		.collect();

	let mut bounds = Bounds::expander(true);
	let mut num_points = 0u64;
	for (np, b) in &results {
		num_points += np;
		bounds.grow_bounds(b);
	}
	if num_points == 0 {
		bail!("no points found");
	}

	let snapped = bounds.snapped();
	let config = BuildConfig {
		input,
		output: build_output,
		tmp: "tmp".to_string(),
		threads: 8,
		bounds: Some([
			snapped.min.x,
			snapped.min.y,
			snapped.min.z,
			snapped.max.x,
			snapped.max.y,
			snapped.max.z,
		]),
		schema: Some(Schema::standard().dims().to_vec()),
		structure: None,
		reprojection: None,
		subset: None,
		compressed: false,
		trust_headers: false,
		num_points: Some(num_points),
		srs: None,
	};

	if let Some(parent) = output.parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent)
				.with_context(|| format!("creating {}", parent.display()))?;
		}
	}
	std::fs::write(output, serde_json::to_string_pretty(&config)?)
		.with_context(|| format!("writing {}", output.display()))?;

	println!(
		"Wrote {} ({} points, bounds {:?}..{:?})",
		output.display(),
		num_points,
		snapped.min,
		snapped.max
	);
	Ok(())
}

fn cmd_build(config_path: &Path, resume: bool) -> Result<()> {
	let config = BuildConfig::load(config_path)?;
	if is_remote_path(&config.output) {
		bail!("output path must be local; no remote endpoint implementation is bundled");
	}

	let out: Arc<dyn Endpoint> = Arc::new(DirectoryEndpoint::new(&config.output));
	let tmp: Arc<dyn Endpoint> = Arc::new(DirectoryEndpoint::new(&config.tmp));
	let schema = config.schema()?;
	let reader: Arc<dyn PointReader> = Arc::new(XyzReader::new(schema.clone()));

	let structure = config.structure();
	let is_3d = structure.is_3d;

	let builder = if resume {
		Builder::resume(out, tmp, reader, config.threads)?
	} else {
		Builder::create(BuilderOptions {
			out,
			tmp,
			reader,
			schema,
			structure,
			bounds: config.bounds.map(|b| {
				Bounds::new(
					DVec3::new(b[0], b[1], b[2]),
					DVec3::new(b[3], b[4], b[5]),
					is_3d,
				)
			}),
			reprojection: config.reprojection.clone(),
			compressed: config.compressed,
			trust_headers: config.trust_headers,
			threads: config.threads,
		})?
	};

	for path in &config.input {
		builder.insert(path)?;
	}
	builder.save()?;

	let stats = builder.stats();
	println!(
		"Done: {} points indexed, {} out of bounds, {} fell through",
		stats.num_points, stats.num_out_of_bounds, stats.num_fall_through
	);
	Ok(())
}

fn cmd_merge(output: &str) -> Result<()> {
	let out: Arc<dyn Endpoint> = Arc::new(DirectoryEndpoint::new(output));
	let meta = cumulus_index::merge(&out)?;

	println!(
		"Merged {} chunks; {} points, {} fell through",
		meta.ids.len(),
		meta.stats.num_points,
		meta.stats.num_fall_through
	);
	Ok(())
}
