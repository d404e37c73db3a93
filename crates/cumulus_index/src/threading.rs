//! TaskPool - bounded task executor over a dedicated rayon thread pool.
//!
//! Two of these drive a build: the work pool runs per-file ingest tasks and
//! the clip pool runs chunk serializations. Unlike a bare `rayon::spawn`,
//! the pool tracks a generation: `join` drains every outstanding task and
//! closes the pool, and `go` opens the next generation so a saved build can
//! accept more inserts.

use std::sync::{Arc, Condvar, Mutex};

use anyhow::{Context, Result};

struct PoolState {
  inner: Mutex<PoolInner>,
  drained: Condvar,
}

struct PoolInner {
  outstanding: usize,
  open: bool,
  generation: u64,
}

/// Fire-and-forget task executor with `add` / `join` / `go` semantics.
pub struct TaskPool {
  pool: rayon::ThreadPool,
  state: Arc<PoolState>,
}

impl TaskPool {
  pub fn new(threads: usize) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads.max(1))
      .build()
      .context("building thread pool")?;

    Ok(Self {
      pool,
      state: Arc::new(PoolState {
        inner: Mutex::new(PoolInner {
          outstanding: 0,
          open: true,
          generation: 0,
        }),
        drained: Condvar::new(),
      }),
    })
  }

  pub fn num_threads(&self) -> usize {
    self.pool.current_num_threads()
  }

  /// Submit a task.
  ///
  /// # Panics
  /// Panics if the current generation was closed by `join` and `go` has not
  /// reopened the pool.
  pub fn add<F>(&self, task: F)
  where
    F: FnOnce() + Send + 'static,
  {
    {
      let mut inner = self.state.inner.lock().unwrap();
      assert!(inner.open, "task submitted to a joined pool; call go() first");
      inner.outstanding += 1;
    }

    let state = Arc::clone(&self.state);
    self.pool.spawn(move || {
      task();
      let mut inner = state.inner.lock().unwrap();
      inner.outstanding -= 1;
      if inner.outstanding == 0 {
        state.drained.notify_all();
      }
    });
  }

  /// Block until every outstanding task completes, then close the pool.
  pub fn join(&self) {
    let mut inner = self.state.inner.lock().unwrap();
    while inner.outstanding > 0 {
      inner = self.state.drained.wait(inner).unwrap();
    }
    inner.open = false;
  }

  /// Open the next generation, re-allowing submissions after a `join`.
  pub fn go(&self) {
    let mut inner = self.state.inner.lock().unwrap();
    inner.open = true;
    inner.generation += 1;
  }

  /// Generation counter; bumps on every `go`.
  pub fn generation(&self) -> u64 {
    self.state.inner.lock().unwrap().generation
  }

  /// Number of tasks submitted but not yet finished.
  pub fn outstanding(&self) -> usize {
    self.state.inner.lock().unwrap().outstanding
  }
}

/// Work/clip split for a total thread budget. Serialization is I/O-bound
/// and benefits from oversubscription relative to CPU-bound ingest.
pub fn work_threads(total: usize) -> usize {
  ((total as f64 * 0.47).round() as usize).max(1)
}

pub fn clip_threads(total: usize) -> usize {
  total.saturating_sub(work_threads(total)).max(4)
}
