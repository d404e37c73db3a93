use glam::DVec3;

use super::*;

fn cfg_3d() -> StructureConfig {
  StructureConfig {
    null_depth_begin: 0,
    null_depth_end: 0,
    base_depth_begin: 0,
    base_depth_end: 4,
    cold_depth_begin: 4,
    cold_depth_end: 8,
    chunk_points: 512,
    is_3d: true,
    cell_capacity: 1,
    subset: None,
  }
}

#[test]
fn test_level_begins_octree() {
  let s = Structure::new(cfg_3d()).unwrap();

  // (8^d - 1) / 7
  assert_eq!(s.level_begin(0), 0);
  assert_eq!(s.level_begin(1), 1);
  assert_eq!(s.level_begin(2), 9);
  assert_eq!(s.level_begin(3), 73);
  assert_eq!(s.level_begin(4), 585);
  assert_eq!(s.level_begin(5), 4681);
}

#[test]
fn test_level_begins_quadtree() {
  let mut cfg = cfg_3d();
  cfg.is_3d = false;
  cfg.chunk_points = 256;
  let s = Structure::new(cfg).unwrap();

  // (4^d - 1) / 3
  assert_eq!(s.level_begin(1), 1);
  assert_eq!(s.level_begin(2), 5);
  assert_eq!(s.level_begin(3), 21);
  assert_eq!(s.level_begin(4), 85);
}

#[test]
fn test_base_and_cold_ranges_are_contiguous() {
  let s = Structure::new(cfg_3d()).unwrap();

  assert_eq!(s.base_index_begin(), 0);
  assert_eq!(s.base_index_end(), 585);
  assert_eq!(s.cold_index_begin(), 585);
  assert_eq!(s.base_index_span(), 585);

  assert!(s.is_base(0));
  assert!(s.is_base(584));
  assert!(!s.is_base(585));
  assert!(!s.is_null(0));
}

#[test]
fn test_null_depths_precede_base() {
  let mut cfg = cfg_3d();
  cfg.null_depth_end = 2;
  cfg.base_depth_begin = 2;
  let s = Structure::new(cfg).unwrap();

  assert!(s.is_null(0));
  assert!(s.is_null(8));
  assert!(s.is_base(9));
  assert_eq!(s.base_index_begin(), 9);
}

#[test]
fn test_chunk_id_alignment() {
  let s = Structure::new(cfg_3d()).unwrap();
  let begin = s.cold_index_begin();
  let span = s.chunk_span();

  assert_eq!(s.chunk_id_for(begin), begin);
  assert_eq!(s.chunk_id_for(begin + 1), begin);
  assert_eq!(s.chunk_id_for(begin + span - 1), begin);
  assert_eq!(s.chunk_id_for(begin + span), begin + span);
  assert_eq!(s.chunk_id_for(begin + span * 3 + 17), begin + span * 3);
}

#[test]
fn test_chunk_span_must_be_branching_power() {
  let mut cfg = cfg_3d();
  cfg.chunk_points = 100;
  assert!(Structure::new(cfg).is_err());

  let mut cfg = cfg_3d();
  cfg.is_3d = false;
  cfg.chunk_points = 512; // 8^3, not a power of 4
  assert!(Structure::new(cfg).is_err());
}

#[test]
fn test_inverted_ranges_rejected() {
  let mut cfg = cfg_3d();
  cfg.cold_depth_end = 4;
  assert!(Structure::new(cfg).is_err());

  let mut cfg = cfg_3d();
  cfg.cold_depth_begin = 5;
  assert!(Structure::new(cfg).is_err());
}

#[test]
fn test_subset_validation() {
  let mut cfg = cfg_3d();
  cfg.null_depth_end = 1;
  cfg.base_depth_begin = 1;
  cfg.subset = Some(Subset { id: 2, of: 4 });
  assert!(Structure::new(cfg).is_ok());

  // Shard count must be a power of four.
  let mut cfg = cfg_3d();
  cfg.null_depth_end = 1;
  cfg.base_depth_begin = 1;
  cfg.subset = Some(Subset { id: 0, of: 6 });
  assert!(Structure::new(cfg).is_err());

  // Storage may not begin above the shard depth.
  let mut cfg = cfg_3d();
  cfg.subset = Some(Subset { id: 0, of: 4 });
  assert!(Structure::new(cfg).is_err());

  // Shard id must be in range.
  let mut cfg = cfg_3d();
  cfg.null_depth_end = 1;
  cfg.base_depth_begin = 1;
  cfg.subset = Some(Subset { id: 4, of: 4 });
  assert!(Structure::new(cfg).is_err());
}

#[test]
fn test_subset_postfix() {
  let s = Structure::new(cfg_3d()).unwrap();
  assert_eq!(s.subset_postfix(), "");

  let mut cfg = cfg_3d();
  cfg.null_depth_end = 1;
  cfg.base_depth_begin = 1;
  cfg.subset = Some(Subset { id: 3, of: 4 });
  let mut s = Structure::new(cfg).unwrap();
  assert_eq!(s.subset_postfix(), "-3");

  s.make_whole();
  assert_eq!(s.subset_postfix(), "");
  assert!(s.subset().is_none());
}

#[test]
fn test_subset_bounds_tile_the_box() {
  let global = Bounds::new(DVec3::splat(-8.0), DVec3::splat(8.0), true);

  let mut seen = Vec::new();
  for id in 0..4 {
    let mut cfg = cfg_3d();
    cfg.null_depth_end = 1;
    cfg.base_depth_begin = 1;
    cfg.subset = Some(Subset { id, of: 4 });
    let s = Structure::new(cfg).unwrap();
    let b = s.subset_bounds(&global).unwrap();

    // Quadrants split x/y only; z is untouched.
    assert_eq!(b.min.z, -8.0);
    assert_eq!(b.max.z, 8.0);
    assert_eq!(b.size().x, 8.0);
    assert_eq!(b.size().y, 8.0);
    seen.push((b.min.x, b.min.y));
  }

  seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
  assert_eq!(seen, vec![(-8.0, -8.0), (-8.0, 0.0), (0.0, -8.0), (0.0, 0.0)]);
}

#[test]
fn test_subset_owns_partitions_every_point() {
  let global = Bounds::new(DVec3::splat(-8.0), DVec3::splat(8.0), true);

  let shards: Vec<Structure> = (0..4)
    .map(|id| {
      let mut cfg = cfg_3d();
      cfg.null_depth_end = 1;
      cfg.base_depth_begin = 1;
      cfg.subset = Some(Subset { id, of: 4 });
      Structure::new(cfg).unwrap()
    })
    .collect();

  // Interior points, boundary points, and the exact center: each must be
  // owned by exactly one shard.
  let probes = [
    DVec3::new(-4.0, -4.0, 0.0),
    DVec3::new(4.0, 4.0, 3.0),
    DVec3::new(0.0, 0.0, 0.0),
    DVec3::new(0.0, -4.0, 1.0),
    DVec3::new(-4.0, 0.0, -1.0),
    DVec3::new(8.0, 8.0, 8.0),
  ];
  for p in probes {
    let owners: Vec<u64> = shards
      .iter()
      .filter(|s| s.subset_owns(&global, p))
      .map(|s| s.subset().unwrap().id)
      .collect();
    assert_eq!(owners.len(), 1, "point {:?} owned by {:?}", p, owners);
  }

  // The plane tie-break sends the center to the lower quadrant.
  assert!(shards[0].subset_owns(&global, DVec3::ZERO));
}

#[test]
fn test_sixteen_way_subset() {
  let global = Bounds::new(DVec3::ZERO, DVec3::splat(16.0), true);
  let mut cfg = cfg_3d();
  cfg.null_depth_end = 2;
  cfg.base_depth_begin = 2;
  // Two shard levels leave 8^2 ids per subtree at the first cold depth.
  cfg.chunk_points = 64;
  cfg.subset = Some(Subset { id: 5, of: 16 });
  let s = Structure::new(cfg).unwrap();

  let b = s.subset_bounds(&global).unwrap();
  assert_eq!(b.size().x, 4.0);
  assert_eq!(b.size().y, 4.0);
  assert!(s.subset_owns(&global, b.center()));
}

#[test]
fn test_config_serde_roundtrip() {
  let mut cfg = cfg_3d();
  cfg.null_depth_end = 1;
  cfg.base_depth_begin = 1;
  cfg.subset = Some(Subset { id: 1, of: 4 });

  let json = serde_json::to_string(&cfg).unwrap();
  assert!(json.contains("\"chunkPoints\":512"));
  assert!(json.contains("\"is3d\":true"));

  let back: StructureConfig = serde_json::from_str(&json).unwrap();
  assert_eq!(back, cfg);
}
