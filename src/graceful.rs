//! Deferral of content mutations while a display region is scrolling.
//!
//! Mutating a region mid-scroll makes the text visibly jump. Callers hand
//! their mutations here instead of applying them directly; updates for a
//! scrolling region wait in a priority queue and are drained at safe points
//! (end of a scheduler tick, or once the region has been quiet long enough).
//!
//! Updates carry an id and are coalesced: a second update with the same id
//! while one is still queued is dropped, so a refresh requested every tick
//! does not pile up behind a long scroll.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::GracefulConfig;

/// A content mutation waiting for a safe moment to run.
pub struct DeferredUpdate {
  /// Coalescing key; one queued update per id.
  pub id: String,
  /// The render region this update would disturb.
  pub region_id: String,
  /// Lower values apply first; ties in enqueue order.
  pub priority: i32,
  pub apply: Box<dyn FnOnce() + Send>,
}

impl DeferredUpdate {
  pub fn new<F>(
    id: impl Into<String>,
    region_id: impl Into<String>,
    priority: i32,
    apply: F,
  ) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Self {
      id: id.into(),
      region_id: region_id.into(),
      priority,
      apply: Box::new(apply),
    }
  }
}

impl std::fmt::Debug for DeferredUpdate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DeferredUpdate")
      .field("id", &self.id)
      .field("region_id", &self.region_id)
      .field("priority", &self.priority)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone, Copy)]
struct ScrollState {
  is_scrolling: bool,
  last_activity_at: Instant,
}

struct QueuedUpdate {
  priority: i32,
  seq: u64,
  enqueued_at: Instant,
  update: DeferredUpdate,
}

impl PartialEq for QueuedUpdate {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority && self.seq == other.seq
  }
}

impl Eq for QueuedUpdate {}

impl PartialOrd for QueuedUpdate {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueuedUpdate {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    // Max-heap inversion: lowest priority value first, then FIFO.
    other
      .priority
      .cmp(&self.priority)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct Inner {
  regions: HashMap<String, ScrollState>,
  queue: BinaryHeap<QueuedUpdate>,
  queued_ids: HashSet<String>,
  seq: u64,
}

/// Tracks per-region scroll activity and applies updates only when they
/// cannot visually disrupt a scroll pass.
///
/// Safe to call from the render task and from fetch workers.
pub struct GracefulUpdateCoordinator {
  inner: Mutex<Inner>,
  inactivity_threshold: Duration,
}

impl GracefulUpdateCoordinator {
  pub fn new(cfg: &GracefulConfig) -> Self {
    Self {
      inner: Mutex::new(Inner {
        regions: HashMap::new(),
        queue: BinaryHeap::new(),
        queued_ids: HashSet::new(),
        seq: 0,
      }),
      inactivity_threshold: Duration::from_millis(cfg.inactivity_threshold_ms),
    }
  }

  /// Called by the rendering layer whenever a region starts or stops
  /// actively scrolling.
  pub fn set_scrolling(&self, region_id: &str, scrolling: bool) {
    let mut inner = self.lock();
    inner.regions.insert(
      region_id.to_string(),
      ScrollState {
        is_scrolling: scrolling,
        last_activity_at: Instant::now(),
      },
    );
  }

  pub fn is_scrolling(&self, region_id: &str) -> bool {
    let inner = self.lock();
    inner
      .regions
      .get(region_id)
      .map(|s| s.is_scrolling)
      .unwrap_or(false)
  }

  /// Apply `update` now if its region is not scrolling, otherwise queue it.
  pub fn defer(&self, update: DeferredUpdate) {
    let apply_now = {
      let mut inner = self.lock();
      let scrolling = inner
        .regions
        .get(&update.region_id)
        .map(|s| s.is_scrolling)
        .unwrap_or(false);

      if scrolling {
        if inner.queued_ids.contains(&update.id) {
          debug!(id = %update.id, "Update already queued; coalescing");
          return;
        }

        inner.queued_ids.insert(update.id.clone());
        let seq = inner.seq;
        inner.seq += 1;
        inner.queue.push(QueuedUpdate {
          priority: update.priority,
          seq,
          enqueued_at: Instant::now(),
          update,
        });
        None
      } else {
        Some(update)
      }
    };

    // Run user callbacks outside the lock.
    if let Some(update) = apply_now {
      (update.apply)();
    }
  }

  /// Drain every queued update whose region is safe: not scrolling, or with
  /// no scroll activity reported within the inactivity threshold (the guard
  /// against a region that claims to be scrolling forever).
  ///
  /// Called once per scheduler tick. Returns the number applied.
  pub fn process_deferred(&self) -> usize {
    let now = Instant::now();

    let ready = {
      let mut inner = self.lock();
      if inner.queue.is_empty() {
        return 0;
      }

      let mut ready = Vec::new();
      let mut held_back = Vec::new();

      while let Some(queued) = inner.queue.pop() {
        if self.region_safe(&inner, &queued.update.region_id, now) {
          ready.push(queued);
        } else {
          held_back.push(queued);
        }
      }

      for queued in &ready {
        inner.queued_ids.remove(&queued.update.id);
      }
      for queued in held_back {
        inner.queue.push(queued);
      }

      ready
    };

    let applied = ready.len();
    for queued in ready {
      debug!(
        id = %queued.update.id,
        region = %queued.update.region_id,
        waited_ms = queued.enqueued_at.elapsed().as_millis() as u64,
        "Applying deferred update"
      );
      (queued.update.apply)();
    }

    applied
  }

  /// Number of updates currently waiting.
  pub fn queued_len(&self) -> usize {
    self.lock().queue.len()
  }

  fn region_safe(&self, inner: &Inner, region_id: &str, now: Instant) -> bool {
    match inner.regions.get(region_id) {
      Some(state) => {
        !state.is_scrolling
          || now.duration_since(state.last_activity_at) >= self.inactivity_threshold
      }
      None => true,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }
}
