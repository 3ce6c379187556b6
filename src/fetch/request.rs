//! Fetch job descriptions, handles, and results.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::cache::TtlStrategy;

/// A boxed future resolving to fetched data or an error message.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

/// Factory for fetch attempts. Called once per attempt so every retry gets
/// a fresh future.
pub type FetchFn = Box<dyn Fn() -> FetchFuture + Send + Sync>;

/// A unit of background work: fetch a value and store it under `cache_key`.
pub struct FetchRequest {
  /// Identifier echoed into the result; defaults to the cache key.
  pub id: String,
  pub cache_key: String,
  /// TTL strategy applied when the fetched value is stored.
  pub strategy: TtlStrategy,
  /// Lower values are dispatched first when the queue is contended.
  pub priority: i32,
  /// Retry count; `None` uses the service default.
  pub max_retries: Option<u32>,
  /// Backoff base; `None` uses the service default.
  pub backoff_base: Option<Duration>,
  pub execute: FetchFn,
}

impl FetchRequest {
  /// Create a request with default priority and retry policy.
  ///
  /// # Example
  ///
  /// ```ignore
  /// let client = weather_client.clone();
  /// let request = FetchRequest::new("weather:current", TtlStrategy::FixedTtl, move || {
  ///     let client = client.clone();
  ///     async move { client.current_conditions().await.map_err(|e| e.to_string()) }
  /// });
  /// ```
  pub fn new<F, Fut>(cache_key: impl Into<String>, strategy: TtlStrategy, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
  {
    let cache_key = cache_key.into();
    Self {
      id: cache_key.clone(),
      cache_key,
      strategy,
      priority: 10,
      max_retries: None,
      backoff_base: None,
      execute: Box::new(move || Box::pin(fetcher())),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_max_retries(mut self, retries: u32) -> Self {
    self.max_retries = Some(retries);
    self
  }

  pub fn with_backoff_base(mut self, base: Duration) -> Self {
    self.backoff_base = Some(base);
    self
  }
}

impl std::fmt::Debug for FetchRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FetchRequest")
      .field("id", &self.id)
      .field("cache_key", &self.cache_key)
      .field("priority", &self.priority)
      .field("max_retries", &self.max_retries)
      .finish_non_exhaustive()
  }
}

/// Terminal outcome of a request. Produced exactly once, after all retries.
#[derive(Debug, Clone)]
pub struct FetchResult {
  pub id: String,
  pub cache_key: String,
  pub success: bool,
  pub value: Option<Value>,
  pub error: Option<String>,
  /// Total attempts made (initial try plus retries).
  pub attempts: u32,
  pub elapsed: Duration,
}

/// Handle to one submitted request's terminal result.
pub struct FetchHandle {
  pub id: String,
  rx: oneshot::Receiver<FetchResult>,
}

impl FetchHandle {
  pub(crate) fn new(id: String, rx: oneshot::Receiver<FetchResult>) -> Self {
    Self { id, rx }
  }

  /// Wait for the terminal result. Returns `None` if the service shut down
  /// before resolving the request.
  pub async fn wait(self) -> Option<FetchResult> {
    self.rx.await.ok()
  }
}

/// What happened to a submission.
pub enum SubmitOutcome {
  Submitted(FetchHandle),
  /// A fetch for the same cache key is already queued or in flight; the
  /// duplicate is dropped.
  AlreadyInFlight,
  /// The queue is full. The caller falls back to whatever is cached,
  /// however stale.
  Rejected,
}

impl SubmitOutcome {
  pub fn is_submitted(&self) -> bool {
    matches!(self, SubmitOutcome::Submitted(_))
  }

  pub fn handle(self) -> Option<FetchHandle> {
    match self {
      SubmitOutcome::Submitted(handle) => Some(handle),
      _ => None,
    }
  }
}
