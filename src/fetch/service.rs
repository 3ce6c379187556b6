//! Bounded worker pool that resolves fetch requests into the cache.
//!
//! Requests are queued by priority and drained by a fixed set of workers.
//! At most one fetch per cache key is outstanding at any time; duplicates
//! are dropped at submission. A full queue rejects synchronously so the
//! render path can immediately fall back to stale cache.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

use super::request::{FetchHandle, FetchRequest, FetchResult, SubmitOutcome};
use crate::cache::CacheStore;
use crate::config::FetchConfig;

/// A request waiting for a worker, ordered by `(priority, submission seq)`.
struct QueuedFetch {
  priority: i32,
  seq: u64,
  request: FetchRequest,
  result_tx: oneshot::Sender<FetchResult>,
}

impl PartialEq for QueuedFetch {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority && self.seq == other.seq
  }
}

impl Eq for QueuedFetch {}

impl PartialOrd for QueuedFetch {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueuedFetch {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    // BinaryHeap is a max-heap; invert so the lowest priority value (and
    // then the earliest submission) pops first.
    other
      .priority
      .cmp(&self.priority)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct ServiceInner {
  queue: Mutex<BinaryHeap<QueuedFetch>>,
  /// Keys currently queued or executing; the dedup set.
  pending_keys: Mutex<HashSet<String>>,
  notify: Notify,
  shutdown: AtomicBool,
  seq: AtomicU64,
  cache: Arc<CacheStore>,
  completion_tx: mpsc::UnboundedSender<FetchResult>,
  timeout: Duration,
  default_retries: u32,
  default_backoff: Duration,
  backoff_cap: Duration,
  queue_capacity: usize,
}

/// Executes fetch jobs off the render path and writes results into the
/// cache. Cloneable; clones share the same pool.
#[derive(Clone)]
pub struct BackgroundFetchService {
  inner: Arc<ServiceInner>,
}

impl BackgroundFetchService {
  /// Create the service and spawn its workers.
  ///
  /// Returns the service and a channel carrying every terminal
  /// `FetchResult`, so the control loop can observe completions without
  /// holding individual handles.
  pub fn new(
    cfg: &FetchConfig,
    cache: Arc<CacheStore>,
  ) -> (Self, mpsc::UnboundedReceiver<FetchResult>) {
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();

    let service = Self {
      inner: Arc::new(ServiceInner {
        queue: Mutex::new(BinaryHeap::new()),
        pending_keys: Mutex::new(HashSet::new()),
        notify: Notify::new(),
        shutdown: AtomicBool::new(false),
        seq: AtomicU64::new(0),
        cache,
        completion_tx,
        timeout: Duration::from_secs(cfg.timeout_seconds),
        default_retries: cfg.max_retries,
        default_backoff: Duration::from_millis(cfg.backoff_base_ms),
        backoff_cap: Duration::from_millis(cfg.backoff_cap_ms),
        queue_capacity: cfg.queue_capacity,
      }),
    };

    for worker_id in 0..cfg.workers.max(1) {
      let worker = service.clone();
      tokio::spawn(async move {
        worker.worker_loop(worker_id).await;
      });
    }

    (service, completion_rx)
  }

  /// Enqueue a fetch.
  ///
  /// Returns `AlreadyInFlight` when a fetch for the same cache key is
  /// queued or executing, and `Rejected` when the queue is at capacity.
  pub fn submit(&self, request: FetchRequest) -> SubmitOutcome {
    let key = request.cache_key.clone();

    {
      let mut pending = lock(&self.inner.pending_keys);
      if pending.contains(&key) {
        debug!(key = %key, "Fetch already in flight; dropping duplicate");
        return SubmitOutcome::AlreadyInFlight;
      }

      let mut queue = lock(&self.inner.queue);
      if queue.len() >= self.inner.queue_capacity {
        warn!(
          key = %key,
          capacity = self.inner.queue_capacity,
          "Fetch queue saturated; rejecting"
        );
        return SubmitOutcome::Rejected;
      }

      pending.insert(key.clone());

      let (result_tx, result_rx) = oneshot::channel();
      let id = request.id.clone();
      queue.push(QueuedFetch {
        priority: request.priority,
        seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
        request,
        result_tx,
      });

      self.inner.notify.notify_one();
      SubmitOutcome::Submitted(FetchHandle::new(id, result_rx))
    }
  }

  /// Partial-then-complete: return whatever is already cached under
  /// `prefix` so the caller can render this frame, while the full fetch
  /// proceeds in the background and overwrites the entry on completion.
  pub fn submit_with_partial(
    &self,
    prefix: &str,
    request: FetchRequest,
  ) -> (Vec<(String, serde_json::Value)>, SubmitOutcome) {
    let partial = self.inner.cache.entries_with_prefix(prefix);
    (partial, self.submit(request))
  }

  /// Number of requests waiting for a worker.
  pub fn queued_count(&self) -> usize {
    lock(&self.inner.queue).len()
  }

  /// Stop accepting work and wake idle workers so they exit.
  pub fn shutdown(&self) {
    self.inner.shutdown.store(true, Ordering::SeqCst);
    self.inner.notify.notify_waiters();
  }

  async fn worker_loop(self, worker_id: usize) {
    debug!(worker_id, "Fetch worker started");

    loop {
      if self.inner.shutdown.load(Ordering::SeqCst) {
        break;
      }

      let job = lock(&self.inner.queue).pop();
      match job {
        Some(job) => self.run_fetch(job).await,
        None => self.inner.notify.notified().await,
      }
    }

    debug!(worker_id, "Fetch worker stopped");
  }

  async fn run_fetch(&self, job: QueuedFetch) {
    let QueuedFetch {
      request, result_tx, ..
    } = job;

    let started = Instant::now();
    let max_attempts = request.max_retries.unwrap_or(self.inner.default_retries) + 1;
    let backoff_base = request.backoff_base.unwrap_or(self.inner.default_backoff);

    let mut attempt = 0u32;
    let mut last_error = String::new();

    let fetched = loop {
      attempt += 1;
      let fut = (request.execute)();
      match tokio::time::timeout(self.inner.timeout, fut).await {
        Ok(Ok(value)) => break Some(value),
        Ok(Err(e)) => last_error = e,
        Err(_) => last_error = format!("timed out after {:?}", self.inner.timeout),
      }

      if attempt >= max_attempts {
        break None;
      }

      let backoff = backoff_base
        .saturating_mul(2u32.saturating_pow(attempt - 1))
        .min(self.inner.backoff_cap);
      debug!(
        key = %request.cache_key,
        attempt,
        backoff_ms = backoff.as_millis() as u64,
        error = %last_error,
        "Fetch attempt failed; retrying"
      );
      tokio::time::sleep(backoff).await;
    };

    let elapsed = started.elapsed();
    let result = match fetched {
      Some(value) => {
        self
          .inner
          .cache
          .put(&request.cache_key, value.clone(), request.strategy);
        info!(
          key = %request.cache_key,
          attempts = attempt,
          elapsed_ms = elapsed.as_millis() as u64,
          "Fetch completed"
        );
        FetchResult {
          id: request.id,
          cache_key: request.cache_key,
          success: true,
          value: Some(value),
          error: None,
          attempts: attempt,
          elapsed,
        }
      }
      None => {
        // Any existing cache entry is left untouched: stale data beats none.
        error!(
          key = %request.cache_key,
          attempts = attempt,
          error = %last_error,
          "Fetch retries exhausted"
        );
        FetchResult {
          id: request.id,
          cache_key: request.cache_key,
          success: false,
          value: None,
          error: Some(last_error),
          attempts: attempt,
          elapsed,
        }
      }
    };

    lock(&self.inner.pending_keys).remove(&result.cache_key);

    // Both receivers are optional: the handle may have been dropped, and
    // the completion channel closes when the control loop exits.
    let _ = self.inner.completion_tx.send(result.clone());
    let _ = result_tx.send(result);
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::TtlStrategy;
  use crate::config::CacheConfig;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;

  fn test_service(cfg: FetchConfig) -> (BackgroundFetchService, Arc<CacheStore>) {
    let cache = Arc::new(CacheStore::new(&CacheConfig::default()));
    let (service, _completions) = BackgroundFetchService::new(&cfg, Arc::clone(&cache));
    (service, cache)
  }

  fn quick_retry_config() -> FetchConfig {
    FetchConfig {
      backoff_base_ms: 1,
      backoff_cap_ms: 4,
      ..FetchConfig::default()
    }
  }

  #[tokio::test]
  async fn test_success_writes_cache() {
    let (service, cache) = test_service(quick_retry_config());

    let request = FetchRequest::new("weather:current", TtlStrategy::FixedTtl, || async {
      Ok(json!({"temp": 71}))
    });

    let handle = service.submit(request).handle().unwrap();
    let result = handle.wait().await.unwrap();

    assert!(result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(cache.get("weather:current"), Some(json!({"temp": 71})));
  }

  #[tokio::test]
  async fn test_dedup_by_cache_key() {
    let (service, _cache) = test_service(quick_retry_config());
    let executions = Arc::new(AtomicU32::new(0));

    let make_request = |counter: Arc<AtomicU32>| {
      FetchRequest::new("nfl:scoreboard", TtlStrategy::SportLiveInterval, move || {
        let counter = Arc::clone(&counter);
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok(json!({"games": []}))
        }
      })
    };

    let first = service.submit(make_request(Arc::clone(&executions)));
    assert!(first.is_submitted());

    // Give the worker a moment to start executing, then submit a duplicate
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = service.submit(make_request(Arc::clone(&executions)));
    assert!(matches!(second, SubmitOutcome::AlreadyInFlight));

    first.handle().unwrap().wait().await.unwrap();
    assert_eq!(executions.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_key_reusable_after_completion() {
    let (service, _cache) = test_service(quick_retry_config());

    let request = || FetchRequest::new("k", TtlStrategy::FixedTtl, || async { Ok(json!(1)) });

    let first = service.submit(request()).handle().unwrap();
    first.wait().await.unwrap();

    assert!(service.submit(request()).is_submitted());
  }

  #[tokio::test]
  async fn test_queue_saturation_rejects() {
    let cfg = FetchConfig {
      workers: 1,
      queue_capacity: 1,
      ..quick_retry_config()
    };
    let (service, _cache) = test_service(cfg);

    let slow = |key: &str| {
      FetchRequest::new(key.to_string(), TtlStrategy::FixedTtl, || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!(null))
      })
    };

    // First request occupies the worker, second fills the queue
    assert!(service.submit(slow("a")).is_submitted());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(service.submit(slow("b")).is_submitted());

    // Queue is now full
    assert!(matches!(service.submit(slow("c")), SubmitOutcome::Rejected));
  }

  #[tokio::test]
  async fn test_retries_exhausted_leaves_cache_untouched() {
    let (service, cache) = test_service(quick_retry_config());
    cache.put("scores:final", json!({"home": 21}), TtlStrategy::FixedTtl);

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let request = FetchRequest::new("scores:final", TtlStrategy::FixedTtl, move || {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<serde_json::Value, _>("api unavailable".to_string())
      }
    })
    .with_max_retries(2);

    let result = service.submit(request).handle().unwrap().wait().await.unwrap();

    // 1 initial attempt + 2 retries
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(result.error.as_deref(), Some("api unavailable"));

    // Last-known-good value survives
    assert_eq!(cache.get("scores:final"), Some(json!({"home": 21})));
  }

  #[tokio::test]
  async fn test_timeout_counts_as_failed_attempt() {
    let cfg = FetchConfig {
      timeout_seconds: 0,
      ..quick_retry_config()
    };
    let (service, _cache) = test_service(cfg);

    let request = FetchRequest::new("slow:endpoint", TtlStrategy::FixedTtl, || async {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok(json!(null))
    })
    .with_max_retries(1);

    let result = service.submit(request).handle().unwrap().wait().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.attempts, 2);
    assert!(result.error.unwrap().contains("timed out"));
  }

  #[tokio::test]
  async fn test_priority_order_under_contention() {
    let cfg = FetchConfig {
      workers: 1,
      ..quick_retry_config()
    };
    let (service, _cache) = test_service(cfg);
    let order = Arc::new(Mutex::new(Vec::new()));

    let tracked = |key: &str, priority: i32, order: Arc<Mutex<Vec<String>>>| {
      let key_owned = key.to_string();
      FetchRequest::new(key.to_string(), TtlStrategy::FixedTtl, move || {
        let order = Arc::clone(&order);
        let key = key_owned.clone();
        async move {
          order.lock().unwrap().push(key);
          Ok(json!(null))
        }
      })
      .with_priority(priority)
    };

    // Occupy the single worker so the next two queue up
    let blocker = FetchRequest::new("blocker", TtlStrategy::FixedTtl, || async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(json!(null))
    });
    let blocker_handle = service.submit(blocker).handle().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let low = service
      .submit(tracked("low", 20, Arc::clone(&order)))
      .handle()
      .unwrap();
    let high = service
      .submit(tracked("high", 1, Arc::clone(&order)))
      .handle()
      .unwrap();

    blocker_handle.wait().await.unwrap();
    low.wait().await.unwrap();
    high.wait().await.unwrap();

    let order = order.lock().unwrap();
    assert_eq!(order.as_slice(), ["high", "low"]);
  }

  #[tokio::test]
  async fn test_partial_then_complete() {
    let (service, cache) = test_service(quick_retry_config());
    cache.put("mlb:game:1", json!({"inning": 3}), TtlStrategy::SportLiveInterval);

    let request = FetchRequest::new("mlb:schedule", TtlStrategy::SportLiveInterval, || async {
      Ok(json!({"games": 15}))
    });

    let (partial, outcome) = service.submit_with_partial("mlb:", request);

    // The cached subset is available immediately
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].0, "mlb:game:1");

    // The full fetch completes in the background
    let result = outcome.handle().unwrap().wait().await.unwrap();
    assert!(result.success);
    assert_eq!(cache.get("mlb:schedule"), Some(json!({"games": 15})));
  }
}
