//! Stats - monotonic ingest counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Shared counters updated by every ingest worker.
///
/// For any input set, `num_points + num_out_of_bounds + num_fall_through`
/// accounts for every point offered to the tree.
#[derive(Debug, Default)]
pub struct Stats {
  num_points: AtomicU64,
  num_out_of_bounds: AtomicU64,
  num_fall_through: AtomicU64,
}

impl Stats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_points(&self, n: u64) {
    self.num_points.fetch_add(n, Ordering::Relaxed);
  }

  pub fn add_out_of_bounds(&self, n: u64) {
    self.num_out_of_bounds.fetch_add(n, Ordering::Relaxed);
  }

  pub fn add_fall_through(&self, n: u64) {
    self.num_fall_through.fetch_add(n, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      num_points: self.num_points.load(Ordering::Relaxed),
      num_out_of_bounds: self.num_out_of_bounds.load(Ordering::Relaxed),
      num_fall_through: self.num_fall_through.load(Ordering::Relaxed),
    }
  }
}

impl From<StatsSnapshot> for Stats {
  fn from(s: StatsSnapshot) -> Self {
    Self {
      num_points: AtomicU64::new(s.num_points),
      num_out_of_bounds: AtomicU64::new(s.num_out_of_bounds),
      num_fall_through: AtomicU64::new(s.num_fall_through),
    }
  }
}

/// Point-in-time counter values, as stored in build metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
  pub num_points: u64,
  pub num_out_of_bounds: u64,
  pub num_fall_through: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_counters_accumulate() {
    let stats = Stats::new();
    stats.add_points(5);
    stats.add_points(3);
    stats.add_out_of_bounds(2);
    stats.add_fall_through(1);

    let s = stats.snapshot();
    assert_eq!(s.num_points, 8);
    assert_eq!(s.num_out_of_bounds, 2);
    assert_eq!(s.num_fall_through, 1);
  }

  #[test]
  fn test_snapshot_roundtrip() {
    let stats = Stats::new();
    stats.add_points(10);
    stats.add_fall_through(4);

    let restored = Stats::from(stats.snapshot());
    assert_eq!(restored.snapshot(), stats.snapshot());
  }

  #[test]
  fn test_snapshot_serde_field_names() {
    let s = StatsSnapshot {
      num_points: 1,
      num_out_of_bounds: 2,
      num_fall_through: 3,
    };
    let json = serde_json::to_string(&s).unwrap();
    assert_eq!(
      json,
      "{\"numPoints\":1,\"numOutOfBounds\":2,\"numFallThrough\":3}"
    );
  }

  #[test]
  fn test_concurrent_updates() {
    use std::sync::Arc;

    let stats = Arc::new(Stats::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
      let stats = Arc::clone(&stats);
      handles.push(std::thread::spawn(move || {
        for _ in 0..1000 {
          stats.add_points(1);
        }
      }));
    }
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(stats.snapshot().num_points, 8000);
  }
}
