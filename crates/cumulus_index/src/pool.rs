//! PointPool - recycled storage for fixed-size point records.
//!
//! Ingest workers churn through millions of short-lived record buffers; the
//! pool keeps released buffers around so steady-state ingest allocates
//! nothing. Stacks detach and splice back wholesale, so a worker grabs one
//! stack per batch and returns whatever it did not consume.

use std::sync::Mutex;

use crate::point::PointInfo;

/// Shared free-list of record buffers, all sized for one build's schema.
pub struct PointPool {
  record_size: usize,
  free: Mutex<Vec<Box<[u8]>>>,
}

/// A detached LIFO of record buffers owned by one worker.
///
/// Not thread-safe by design; the pool itself is.
#[derive(Default)]
pub struct RecordStack {
  bufs: Vec<Box<[u8]>>,
}

impl RecordStack {
  pub fn pop_one(&mut self) -> Option<Box<[u8]>> {
    self.bufs.pop()
  }

  pub fn push(&mut self, buf: Box<[u8]>) {
    self.bufs.push(buf);
  }

  /// Concatenate another stack onto this one without touching its elements.
  pub fn splice(&mut self, mut other: RecordStack) {
    self.bufs.append(&mut other.bufs);
  }

  pub fn len(&self) -> usize {
    self.bufs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bufs.is_empty()
  }
}

impl PointPool {
  pub fn new(record_size: usize) -> Self {
    assert!(record_size > 0, "record size must be positive");
    Self {
      record_size,
      free: Mutex::new(Vec::new()),
    }
  }

  pub fn record_size(&self) -> usize {
    self.record_size
  }

  /// Detach a stack of `n` buffers, reusing released ones first.
  pub fn acquire(&self, n: usize) -> RecordStack {
    let mut bufs = {
      let mut free = self.free.lock().unwrap();
      let take = n.min(free.len());
      let split_at = free.len() - take;
      free.split_off(split_at)
    };
    while bufs.len() < n {
      bufs.push(vec![0u8; self.record_size].into_boxed_slice());
    }
    RecordStack { bufs }
  }

  /// Return a stack to the free-list in one splice.
  pub fn release(&self, stack: RecordStack) {
    if stack.bufs.is_empty() {
      return;
    }
    let mut free = self.free.lock().unwrap();
    free.extend(stack.bufs);
  }

  /// Recycle the record buffer of a discarded point.
  pub fn release_info(&self, info: PointInfo) {
    self.free.lock().unwrap().push(info.data);
  }

  #[cfg(test)]
  fn free_len(&self) -> usize {
    self.free.lock().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use glam::DVec3;

  #[test]
  fn test_acquire_allocates_fresh() {
    let pool = PointPool::new(16);
    let mut stack = pool.acquire(3);

    assert_eq!(stack.len(), 3);
    let buf = stack.pop_one().unwrap();
    assert_eq!(buf.len(), 16);
    pool.release(stack);
  }

  #[test]
  fn test_release_recycles() {
    let pool = PointPool::new(8);
    let stack = pool.acquire(4);
    pool.release(stack);
    assert_eq!(pool.free_len(), 4);

    // A second acquire is served entirely from the free-list.
    let stack = pool.acquire(4);
    assert_eq!(stack.len(), 4);
    assert_eq!(pool.free_len(), 0);
    pool.release(stack);
  }

  #[test]
  fn test_splice_concatenates() {
    let pool = PointPool::new(8);
    let mut a = pool.acquire(2);
    let b = pool.acquire(3);

    a.splice(b);
    assert_eq!(a.len(), 5);
    pool.release(a);
    assert_eq!(pool.free_len(), 5);
  }

  #[test]
  fn test_release_info_returns_buffer() {
    let pool = PointPool::new(8);
    let mut stack = pool.acquire(1);
    let info = PointInfo::new(DVec3::ZERO, stack.pop_one().unwrap());

    pool.release_info(info);
    assert_eq!(pool.free_len(), 1);
  }

  #[test]
  fn test_concurrent_acquire_release() {
    use std::sync::Arc;

    let pool = Arc::new(PointPool::new(32));
    let mut handles = Vec::new();
    for _ in 0..4 {
      let pool = Arc::clone(&pool);
      handles.push(std::thread::spawn(move || {
        for _ in 0..100 {
          let stack = pool.acquire(16);
          pool.release(stack);
        }
      }));
    }
    for h in handles {
      h.join().unwrap();
    }
  }
}
