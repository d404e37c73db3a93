//! Builder - orchestrates parallel ingest into the tree store.
//!
//! One builder process owns one output path. Files are registered in the
//! manifest and ingested on the work pool; every accepted point is routed
//! through a fresh climber into the registry. Workers bound their live
//! chunk footprint by replacing their clipper at a fixed cadence, and
//! `save` establishes the durability fence: once it returns, every
//! accepted point is in the base chunk or a serialized cold chunk.

use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use crate::bounds::{Bounds, Range};
use crate::chunk::BaseChunk;
use crate::climber::Climber;
use crate::clipper::Clipper;
use crate::endpoint::{fetch_local, Endpoint};
use crate::manifest::{FileStatus, Manifest};
use crate::meta::{meta_key, BoundsMeta, MetaDoc, META_KEY};
use crate::point::PointInfo;
use crate::pool::PointPool;
use crate::reader::{PointReader, Reprojection};
use crate::registry::Registry;
use crate::schema::Schema;
use crate::stats::{Stats, StatsSnapshot};
use crate::structure::{Structure, StructureConfig};
use crate::threading::{clip_threads, work_threads, TaskPool};

/// Accepted points between clipper swaps on a multi-threaded work pool.
const CLIP_INTERVAL: u64 = 65_536 * 24;
/// Same, when the work pool has a single thread and can afford to hold a
/// larger footprint.
const CLIP_INTERVAL_SERIAL: u64 = 65_536 * 256;

pub struct BuilderOptions {
  pub out: Arc<dyn Endpoint>,
  pub tmp: Arc<dyn Endpoint>,
  pub reader: Arc<dyn PointReader>,
  pub schema: Schema,
  pub structure: StructureConfig,
  /// Global bounds; inferred from the first input when absent.
  pub bounds: Option<Bounds>,
  pub reprojection: Option<Reprojection>,
  pub compressed: bool,
  pub trust_headers: bool,
  /// Total thread budget, split between the work and clip pools.
  pub threads: usize,
}

struct Shared {
  out: Arc<dyn Endpoint>,
  tmp: Arc<dyn Endpoint>,
  reader: Arc<dyn PointReader>,
  schema: Schema,
  structure: Structure,
  registry: Registry,
  manifest: Manifest,
  stats: Stats,
  pool: PointPool,
  bounds: RwLock<Option<Bounds>>,
  srs: Mutex<String>,
  reprojection: Option<Reprojection>,
  compressed: bool,
  trust_headers: bool,
  clip_interval: u64,
}

pub struct Builder {
  shared: Arc<Shared>,
  work_pool: TaskPool,
}

impl Builder {
  /// Start a fresh build.
  ///
  /// Fails synchronously on configuration errors: an invalid structure, a
  /// remote tmp path, or an unwritable local output directory.
  pub fn create(options: BuilderOptions) -> Result<Self> {
    let structure = Structure::new(options.structure)?;
    prep(&*options.out, &*options.tmp)?;

    let wt = work_threads(options.threads);
    let ct = clip_threads(options.threads);

    let registry = Registry::new(
      Arc::clone(&options.out),
      options.schema.clone(),
      structure.clone(),
      options.compressed,
      ct,
    )?;

    let pool = PointPool::new(options.schema.point_size());

    Ok(Self {
      shared: Arc::new(Shared {
        out: options.out,
        tmp: options.tmp,
        reader: options.reader,
        schema: options.schema,
        structure,
        registry,
        manifest: Manifest::new(),
        stats: Stats::new(),
        pool,
        bounds: RwLock::new(options.bounds),
        srs: Mutex::new(String::new()),
        reprojection: options.reprojection,
        compressed: options.compressed,
        trust_headers: options.trust_headers,
        clip_interval: if wt == 1 {
          CLIP_INTERVAL_SERIAL
        } else {
          CLIP_INTERVAL
        },
      }),
      work_pool: TaskPool::new(wt)?,
    })
  }

  /// Reopen an existing build for continuation: parse its metadata, restore
  /// the base chunk, and seed the known chunk ids so touches fetch instead
  /// of allocating.
  pub fn resume(
    out: Arc<dyn Endpoint>,
    tmp: Arc<dyn Endpoint>,
    reader: Arc<dyn PointReader>,
    threads: usize,
  ) -> Result<Self> {
    prep(&*out, &*tmp)?;

    let meta = MetaDoc::parse(&out.get(META_KEY).context("reading build metadata")?)?;
    let structure = Structure::new(meta.structure)?;
    let schema = Schema::new(meta.schema)?;
    let bounds = meta.bbox.to_bounds(structure.is_3d());

    let wt = work_threads(threads);
    let ct = clip_threads(threads);

    let registry = Registry::load(
      Arc::clone(&out),
      schema.clone(),
      structure.clone(),
      meta.compressed,
      ct,
      meta.ids,
    )?;

    let pool = PointPool::new(schema.point_size());

    Ok(Self {
      shared: Arc::new(Shared {
        out,
        tmp,
        reader,
        pool,
        registry,
        manifest: Manifest::from_parts(meta.manifest, meta.manifest_status),
        stats: Stats::from(meta.stats),
        bounds: RwLock::new(Some(bounds)),
        srs: Mutex::new(meta.srs),
        reprojection: meta.reprojection,
        compressed: meta.compressed,
        trust_headers: meta.trust_headers,
        clip_interval: if wt == 1 {
          CLIP_INTERVAL_SERIAL
        } else {
          CLIP_INTERVAL
        },
        schema,
        structure,
      }),
      work_pool: TaskPool::new(wt)?,
    })
  }

  /// Register a file and enqueue its ingest task.
  ///
  /// Returns false when the path was inserted before or the reader cannot
  /// open it (recorded as an omission). The first registered file also
  /// resolves the global bounds when none were supplied; a failure there is
  /// fatal.
  pub fn insert(&self, path: &str) -> Result<bool> {
    if !self.shared.reader.good(path) {
      warn!("cannot open {path}; omitting");
      self.shared.manifest.add_omission(path);
      return Ok(false);
    }

    let Some(origin) = self.shared.manifest.add_origin(path) else {
      return Ok(false);
    };

    if self.shared.bounds.read().unwrap().is_none() {
      self.infer(path)?;
    }

    info!("adding {origin} - {path}");

    let shared = Arc::clone(&self.shared);
    let task_path = path.to_string();
    self.work_pool.add(move || {
      match ingest_file(&shared, origin, &task_path) {
        Ok(()) => {
          shared.manifest.set_status(origin, FileStatus::Inserted);
          info!("done {origin} - {task_path}");
        }
        Err(e) => {
          warn!("during {task_path}: {e:#}");
          shared.manifest.set_status(origin, FileStatus::Error);
        }
      }
    });

    Ok(true)
  }

  /// Block until every enqueued ingest task completes.
  pub fn join(&self) {
    self.work_pool.join();
  }

  /// Join, flush the registry, and write the metadata document.
  ///
  /// After save the build accepts inserts again, so alternating
  /// insert/save phases (crash-and-resume, incremental delivery) compose.
  pub fn save(&self) -> Result<()> {
    self.join();

    let ids = self.shared.registry.save()?;
    let meta = self.meta_doc(ids)?;
    let key = meta_key(&self.shared.structure.subset_postfix());
    self
      .shared
      .out
      .put(&key, meta.to_json()?.as_bytes())
      .with_context(|| format!("writing {key}"))?;

    self.work_pool.go();
    info!("saved {key}: {:?}", meta.stats);
    Ok(())
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats.snapshot()
  }

  pub fn structure(&self) -> &Structure {
    &self.shared.structure
  }

  pub fn bounds(&self) -> Option<Bounds> {
    *self.shared.bounds.read().unwrap()
  }

  pub fn manifest(&self) -> Vec<crate::manifest::FileInfo> {
    self.shared.manifest.snapshot()
  }

  /// Resolve global bounds and srs from the first input file.
  ///
  /// With trusted headers a preview supplies the box directly; otherwise
  /// every point streams through an expander. Either way the corners are
  /// rounded outward to integers.
  fn infer(&self, path: &str) -> Result<()> {
    let shared = &self.shared;
    let is_3d = shared.structure.is_3d();
    let handle = fetch_local(path, &*shared.tmp)?;

    let mut srs = String::new();
    let mut inferred: Option<Bounds> = None;

    if let Some(preview) = shared
      .reader
      .preview(handle.path(), shared.reprojection.as_ref())
    {
      srs = preview.srs;
      if shared.trust_headers {
        if let Some(b) = preview.bounds {
          if b.exists() {
            info!("inferring bounds from header of {path}");
            inferred = Some(Bounds::new(b.min.floor(), b.max.ceil(), is_3d));
          }
        }
      }
    }

    if inferred.is_none() {
      info!("inferring bounds from full read of {path}");
      let mut expander = Bounds::expander(true);
      let ok = shared
        .reader
        .run(handle.path(), shared.reprojection.as_ref(), &mut |batch| {
          for (p, _) in batch.iter() {
            expander.grow(p);
          }
        });
      if !ok || !expander.exists() {
        bail!("error inferring bounds from {path}");
      }
      inferred = Some(Bounds::new(expander.min.floor(), expander.max.ceil(), is_3d));
    }

    let bounds = inferred.expect("set above");
    info!("got bounds {:?}..{:?}", bounds.min, bounds.max);
    *shared.bounds.write().unwrap() = Some(bounds);

    let mut have = shared.srs.lock().unwrap();
    if have.is_empty() {
      *have = srs;
    }
    Ok(())
  }

  fn meta_doc(&self, ids: Vec<u64>) -> Result<MetaDoc> {
    let shared = &self.shared;
    let bounds = self
      .bounds()
      .ok_or_else(|| anyhow!("cannot save before bounds are known"))?;

    let files = shared.manifest.snapshot();
    Ok(MetaDoc {
      bbox: BoundsMeta::from_bounds(&bounds),
      schema: shared.schema.dims().to_vec(),
      structure: shared.structure.config().clone(),
      reprojection: shared.reprojection.clone(),
      manifest: files.iter().map(|f| f.path.clone()).collect(),
      manifest_status: files.iter().map(|f| f.status).collect(),
      srs: shared.srs.lock().unwrap().clone(),
      stats: shared.stats.snapshot(),
      compressed: shared.compressed,
      trust_headers: shared.trust_headers,
      ids,
    })
  }
}

/// Per-file ingest driver, run on the work pool.
fn ingest_file(shared: &Shared, origin: u64, path: &str) -> Result<()> {
  let handle = fetch_local(path, &*shared.tmp)?;
  let bounds = shared
    .bounds
    .read()
    .unwrap()
    .ok_or_else(|| anyhow!("bounds not resolved before ingest"))?;
  let sub_bounds = shared.structure.subset_bounds(&bounds);

  // With trusted headers a preview can rule the whole file in or out
  // before any decoding happens.
  if shared.trust_headers {
    if let Some(preview) = shared
      .reader
      .preview(handle.path(), shared.reprojection.as_ref())
    {
      if let Some(pb) = preview.bounds {
        if !pb.overlaps(&bounds) {
          shared.stats.add_out_of_bounds(preview.num_points);
          return Ok(());
        }
        if let Some(sb) = &sub_bounds {
          if !pb.overlaps(sb) {
            return Ok(());
          }
        }
      }
    }
  }

  let mut clipper = Clipper::new(&shared.registry);
  let mut z_range = Range::expander();
  let mut accepted_since_swap: u64 = 0;
  let mut failure: Option<anyhow::Error> = None;

  let ok = shared
    .reader
    .run(handle.path(), shared.reprojection.as_ref(), &mut |batch| {
      if failure.is_some() {
        return;
      }
      if batch.stride() != shared.schema.point_size() {
        failure = Some(anyhow!(
          "batch stride {} does not match schema record size {}",
          batch.stride(),
          shared.schema.point_size()
        ));
        return;
      }

      let mut stack = shared.pool.acquire(batch.len());
      for (p, record) in batch.iter() {
        let mut buf = stack.pop_one().expect("stack sized to batch");
        buf.copy_from_slice(record);
        shared.schema.stamp_origin(&mut buf, origin);
        let info = PointInfo::new(p, buf);

        if !bounds.contains(p) {
          shared.stats.add_out_of_bounds(1);
          shared.pool.release_info(info);
          continue;
        }
        if !shared.structure.subset_owns(&bounds, p) {
          shared.pool.release_info(info);
          continue;
        }

        let mut climber = Climber::new(bounds, &shared.structure);
        match shared.registry.add_point(info, &mut climber, &mut clipper) {
          Ok(None) => {
            shared.stats.add_points(1);
            if !shared.structure.is_3d() {
              z_range.grow(p.z);
            }
            accepted_since_swap += 1;
            if accepted_since_swap >= shared.clip_interval {
              accepted_since_swap = 0;
              clipper = Clipper::new(&shared.registry);
            }
          }
          Ok(Some(rejected)) => {
            shared.stats.add_fall_through(1);
            shared.pool.release_info(rejected);
          }
          Err(e) => {
            failure = Some(e);
            return;
          }
        }
      }
      shared.pool.release(stack);
    });

  if let Some(e) = failure {
    return Err(e);
  }
  if !ok {
    bail!("reader failed on {path}");
  }

  // Quadtree builds learn their z extent from the data itself.
  if !shared.structure.is_3d() && z_range.exists() {
    let mut guard = shared.bounds.write().unwrap();
    if let Some(b) = guard.as_mut() {
      b.grow_z(z_range.snapped());
    }
  }

  Ok(())
}

fn prep(out: &dyn Endpoint, tmp: &dyn Endpoint) -> Result<()> {
  if tmp.is_remote() {
    bail!("tmp path must be local");
  }
  if let Some(root) = tmp.root() {
    fs::create_dir_all(root).context("creating tmp directory")?;
  }
  if !out.is_remote() {
    if let Some(root) = out.root() {
      fs::create_dir_all(root).context("creating output directory")?;
    }
  }
  Ok(())
}

/// Unify a sharded build in place.
///
/// Reads every `entwine-{i}`, unions their chunk id lists, merges the base
/// chunks slot by slot, and sums the counters. Out-of-bounds counts are
/// measured against the shared global bounds, so the segments must agree on
/// them exactly. Writes the unified `entwine` document and the merged base
/// chunk under its postfix-free key.
pub fn merge(out: &Arc<dyn Endpoint>) -> Result<MetaDoc> {
  let first = MetaDoc::parse(&out.get(&meta_key("-0")).context("reading entwine-0")?)?;
  let Some(subset) = first.structure.subset else {
    bail!("cannot merge: entwine-0 is not a subset build");
  };
  let of = subset.of;

  let schema = Schema::new(first.schema.clone())?;
  let structure = Structure::new(first.structure.clone())?;
  let compressed = first.compressed;
  let base_begin = structure.base_index_begin();

  let mut ids: BTreeSet<u64> = BTreeSet::new();
  let mut base: Option<BaseChunk> = None;
  let mut stats = StatsSnapshot::default();

  for i in 0..of {
    info!("merging segment {} / {}", i + 1, of);
    let meta = if i == 0 {
      first.clone()
    } else {
      MetaDoc::parse(&out.get(&meta_key(&format!("-{i}")))?)?
    };
    ids.extend(meta.ids.iter().copied());

    let bytes = out
      .get_binary(&format!("{base_begin}-{i}"))
      .with_context(|| format!("fetching base chunk of segment {i}"))?;
    let segment = BaseChunk::deserialize(&structure, &schema, compressed, bytes)?;

    if i == 0 {
      stats = meta.stats;
      base = Some(segment);
    } else {
      if meta.stats.num_out_of_bounds != stats.num_out_of_bounds {
        bail!(
          "segment {i} disagrees on out-of-bounds count: {} vs {}",
          meta.stats.num_out_of_bounds,
          stats.num_out_of_bounds
        );
      }
      stats.num_points += meta.stats.num_points;
      stats.num_fall_through += meta.stats.num_fall_through;
      base.as_mut().expect("set on first segment").merge(segment);
    }
  }

  let base = base.expect("at least one segment");
  let mut meta = first;
  meta.structure.subset = None;
  meta.stats = stats;
  meta.ids = ids.into_iter().collect();

  out
    .put(META_KEY, meta.to_json()?.as_bytes())
    .context("writing unified metadata")?;
  out
    .put(&base_begin.to_string(), &base.serialize(&schema, compressed))
    .context("writing merged base chunk")?;

  Ok(meta)
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod builder_test;
