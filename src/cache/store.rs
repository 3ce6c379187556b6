//! Process-wide cache store with TTL freshness, change detection, and LRU
//! eviction.
//!
//! The render loop reads from this store on every tick; background fetch
//! workers write into it. All access goes through one coarse lock — values
//! are small and contention is low, so per-key granularity is not worth it.

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::storage::{CacheStorage, NoopStorage, PersistedEntry};
use super::strategy::{TtlPolicy, TtlStrategy};
use crate::config::CacheConfig;

/// Content fingerprint of a cached value.
///
/// SHA-256 over the JSON serialization. Adapters are expected to strip
/// volatile non-semantic fields (fetch timestamps, request ids) before
/// handing values to the cache, since the core cannot know which fields
/// carry meaning.
pub fn fingerprint(value: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(value.to_string().as_bytes());
  hex::encode(hasher.finalize())
}

/// One stored value with its freshness bookkeeping. The strategy that
/// chose the TTL lives only in the persisted form; in memory the resolved
/// TTL is all that matters.
#[derive(Debug, Clone)]
struct Entry {
  value: Value,
  stored_at: Instant,
  ttl: Duration,
  fingerprint: String,
  last_accessed: Instant,
}

impl Entry {
  fn is_fresh(&self) -> bool {
    self.stored_at.elapsed() < self.ttl
  }
}

/// A point-in-time view of one cached value, handed to mode collaborators.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
  pub value: Value,
  /// Whether the entry was within its TTL at snapshot time.
  pub fresh: bool,
  pub fingerprint: String,
}

/// Hit/miss/eviction counters for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub entry_count: usize,
}

struct Inner {
  entries: HashMap<String, Entry>,
  stats: CacheStats,
}

/// The process-wide display-content cache.
pub struct CacheStore {
  inner: Mutex<Inner>,
  policy: TtlPolicy,
  max_entries: usize,
  access_horizon: Duration,
  storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
  /// Create a memory-only store.
  pub fn new(cfg: &CacheConfig) -> Self {
    Self::with_storage(cfg, Arc::new(NoopStorage))
  }

  /// Create a store that writes entries through to `storage`.
  pub fn with_storage(cfg: &CacheConfig, storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        entries: HashMap::new(),
        stats: CacheStats::default(),
      }),
      policy: TtlPolicy::from_config(cfg),
      max_entries: cfg.max_entries,
      access_horizon: Duration::from_secs(cfg.access_horizon_seconds),
      storage,
    }
  }

  /// Load persisted entries from the storage backend.
  ///
  /// Wall-clock age is converted to monotonic age; entries older than the
  /// process can represent are kept but marked immediately stale, so a
  /// restart serves last-known-good data while a refresh is scheduled.
  pub fn warm_start(&self) {
    let persisted = match self.storage.load_all() {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "Cache warm start failed; starting empty");
        return;
      }
    };

    let now = Instant::now();
    let loaded = persisted.len();
    let mut inner = self.lock();

    for (key, entry) in persisted {
      let elapsed = (Utc::now() - entry.stored_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
      let ttl = Duration::from_secs(entry.ttl_seconds.max(0) as u64);

      // If the wall-clock age exceeds what Instant can go back to, keep the
      // value but force it stale.
      let (stored_at, ttl) = match now.checked_sub(elapsed) {
        Some(at) => (at, ttl),
        None => (now, Duration::ZERO),
      };

      inner.entries.insert(
        key,
        Entry {
          value: entry.value,
          stored_at,
          ttl,
          fingerprint: entry.fingerprint,
          last_accessed: now,
        },
      );
    }

    inner.stats.entry_count = inner.entries.len();
    debug!(entries = loaded, "Cache warm start complete");
  }

  /// Get the raw value for a key, if present (fresh or stale).
  pub fn get(&self, key: &str) -> Option<Value> {
    self.snapshot(key).map(|s| s.value)
  }

  /// Get the value together with its freshness at this instant.
  pub fn snapshot(&self, key: &str) -> Option<CacheSnapshot> {
    let mut inner = self.lock();
    match inner.entries.get_mut(key) {
      Some(entry) => {
        entry.last_accessed = Instant::now();
        let snapshot = CacheSnapshot {
          value: entry.value.clone(),
          fresh: entry.is_fresh(),
          fingerprint: entry.fingerprint.clone(),
        };
        inner.stats.hits += 1;
        Some(snapshot)
      }
      None => {
        inner.stats.misses += 1;
        None
      }
    }
  }

  /// Store a value, stamping its TTL per the strategy.
  pub fn put(&self, key: &str, value: Value, strategy: TtlStrategy) {
    let ttl = self.policy.resolve(key, strategy, Utc::now());
    self.insert(key, value, ttl, strategy);
  }

  fn insert(&self, key: &str, value: Value, ttl: Duration, strategy: TtlStrategy) {
    let fp = fingerprint(&value);
    let now = Instant::now();

    let persisted = PersistedEntry {
      value: value.clone(),
      stored_at: Utc::now(),
      ttl_seconds: ttl.as_secs() as i64,
      fingerprint: fp.clone(),
      strategy,
    };
    if let Err(e) = self.storage.persist(key, &persisted) {
      warn!(key = %key, error = %e, "Failed to persist cache entry");
    }

    let mut inner = self.lock();
    inner.entries.insert(
      key.to_string(),
      Entry {
        value,
        stored_at: now,
        ttl,
        fingerprint: fp,
        last_accessed: now,
      },
    );
    self.evict_locked(&mut inner);
    inner.stats.entry_count = inner.entries.len();
  }

  /// Whether the entry for `key` exists and is within its TTL.
  pub fn is_fresh(&self, key: &str) -> bool {
    let inner = self.lock();
    inner.entries.get(key).is_some_and(|e| e.is_fresh())
  }

  /// Whether `candidate` differs from the cached value by fingerprint.
  ///
  /// Used by consumers to decide whether a re-render is needed before the
  /// TTL expires. Comparing fingerprints never shortens the TTL itself.
  /// Absent entries always count as changed.
  pub fn has_changed(&self, key: &str, candidate: &Value) -> bool {
    let inner = self.lock();
    match inner.entries.get(key) {
      Some(entry) => entry.fingerprint != fingerprint(candidate),
      None => true,
    }
  }

  /// All entries whose key starts with `prefix`, stale or fresh.
  ///
  /// Serves the partial-then-complete fetch pattern: an aggregate fetch can
  /// render the already-cached subset while the full fetch runs.
  pub fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
    let inner = self.lock();
    inner
      .entries
      .iter()
      .filter(|(key, _)| key.starts_with(prefix))
      .map(|(key, entry)| (key.clone(), entry.value.clone()))
      .collect()
  }

  /// Drop all entries.
  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.entries.clear();
    inner.stats.entry_count = 0;
    drop(inner);

    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "Failed to clear persisted cache");
    }
  }

  pub fn stats(&self) -> CacheStats {
    self.lock().stats.clone()
  }

  /// Evict least-recently-accessed entries beyond the access horizon while
  /// the store is over its soft cap. Entries accessed within the horizon
  /// are never evicted, so the cap can be exceeded under active load.
  fn evict_locked(&self, inner: &mut Inner) {
    if inner.entries.len() <= self.max_entries {
      return;
    }

    let mut candidates: Vec<(String, Instant)> = inner
      .entries
      .iter()
      .filter(|(_, e)| e.last_accessed.elapsed() >= self.access_horizon)
      .map(|(k, e)| (k.clone(), e.last_accessed))
      .collect();
    candidates.sort_by_key(|(_, accessed)| *accessed);

    let mut evicted = 0u64;
    for (key, _) in candidates {
      if inner.entries.len() <= self.max_entries {
        break;
      }
      inner.entries.remove(&key);
      if let Err(e) = self.storage.remove(&key) {
        warn!(key = %key, error = %e, "Failed to remove persisted cache entry");
      }
      evicted += 1;
    }

    if evicted > 0 {
      inner.stats.evictions += evicted;
      debug!(evicted, remaining = inner.entries.len(), "Cache eviction pass");
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    // A poisoned lock means a panic mid-update; the cache is advisory, so
    // continuing with whatever state remains beats taking down the loop.
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }

  #[cfg(test)]
  fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
    self.insert(key, value, ttl, TtlStrategy::FixedTtl);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn test_store(max_entries: usize, horizon_secs: u64) -> CacheStore {
    let mut cfg = CacheConfig::default();
    cfg.max_entries = max_entries;
    cfg.access_horizon_seconds = horizon_secs;
    cfg.fixed_ttl_seconds = 300;
    CacheStore::new(&cfg)
  }

  #[test]
  fn test_put_and_get() {
    let store = test_store(16, 900);
    store.put("weather:current", json!({"temp": 71}), TtlStrategy::FixedTtl);

    assert_eq!(store.get("weather:current"), Some(json!({"temp": 71})));
    assert_eq!(store.get("weather:missing"), None);

    let stats = store.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entry_count, 1);
  }

  #[test]
  fn test_fresh_after_put() {
    let store = test_store(16, 900);
    store.put("clock:tz", json!("UTC"), TtlStrategy::FixedTtl);
    assert!(store.is_fresh("clock:tz"));
  }

  #[test]
  fn test_stale_after_ttl_expiry() {
    let store = test_store(16, 900);
    store.put_with_ttl("nfl:scoreboard", json!({"home": 7}), Duration::from_millis(20));
    assert!(store.is_fresh("nfl:scoreboard"));

    std::thread::sleep(Duration::from_millis(30));
    assert!(!store.is_fresh("nfl:scoreboard"));

    // Stale entries still serve their value (last-known-good)
    let snapshot = store.snapshot("nfl:scoreboard").unwrap();
    assert!(!snapshot.fresh);
    assert_eq!(snapshot.value, json!({"home": 7}));
  }

  #[test]
  fn test_missing_key_is_not_fresh() {
    let store = test_store(16, 900);
    assert!(!store.is_fresh("absent"));
  }

  #[test]
  fn test_has_changed_compares_fingerprints() {
    let store = test_store(16, 900);
    store.put("stocks:AAPL", json!({"price": 231.4}), TtlStrategy::FixedTtl);

    assert!(!store.has_changed("stocks:AAPL", &json!({"price": 231.4})));
    assert!(store.has_changed("stocks:AAPL", &json!({"price": 232.0})));
    assert!(store.has_changed("stocks:MSFT", &json!({"price": 410.0})));
  }

  #[test]
  fn test_has_changed_does_not_extend_ttl() {
    let store = test_store(16, 900);
    store.put_with_ttl("k", json!(1), Duration::from_millis(20));

    std::thread::sleep(Duration::from_millis(30));
    // Change detection on a stale entry leaves it stale
    assert!(!store.has_changed("k", &json!(1)));
    assert!(!store.is_fresh("k"));
  }

  #[test]
  fn test_lru_eviction_over_soft_cap() {
    let store = test_store(2, 0);

    store.put("a", json!(1), TtlStrategy::FixedTtl);
    std::thread::sleep(Duration::from_millis(5));
    store.put("b", json!(2), TtlStrategy::FixedTtl);
    std::thread::sleep(Duration::from_millis(5));
    store.put("c", json!(3), TtlStrategy::FixedTtl);

    assert_eq!(store.get("a"), None, "oldest entry should be evicted");
    assert!(store.get("b").is_some());
    assert!(store.get("c").is_some());
    assert!(store.stats().evictions >= 1);
  }

  #[test]
  fn test_access_refreshes_lru_position() {
    let store = test_store(2, 0);

    store.put("a", json!(1), TtlStrategy::FixedTtl);
    std::thread::sleep(Duration::from_millis(5));
    store.put("b", json!(2), TtlStrategy::FixedTtl);
    std::thread::sleep(Duration::from_millis(5));

    // Touch "a" so "b" becomes the eviction candidate
    store.get("a");
    std::thread::sleep(Duration::from_millis(5));
    store.put("c", json!(3), TtlStrategy::FixedTtl);

    assert!(store.get("a").is_some(), "recently accessed entry survives");
    assert_eq!(store.get("b"), None);
  }

  #[test]
  fn test_entries_within_horizon_are_kept() {
    // Horizon far in the future: nothing qualifies for eviction, so the
    // soft cap may be exceeded.
    let store = test_store(1, 900);
    store.put("a", json!(1), TtlStrategy::FixedTtl);
    store.put("b", json!(2), TtlStrategy::FixedTtl);

    assert!(store.get("a").is_some());
    assert!(store.get("b").is_some());
    assert_eq!(store.stats().evictions, 0);
  }

  #[test]
  fn test_entries_with_prefix() {
    let store = test_store(16, 900);
    store.put("nfl:game:1", json!({"id": 1}), TtlStrategy::SportLiveInterval);
    store.put("nfl:game:2", json!({"id": 2}), TtlStrategy::SportLiveInterval);
    store.put("nba:game:9", json!({"id": 9}), TtlStrategy::SportLiveInterval);

    let mut nfl = store.entries_with_prefix("nfl:");
    nfl.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(nfl.len(), 2);
    assert_eq!(nfl[0].0, "nfl:game:1");
  }

  #[test]
  fn test_clear() {
    let store = test_store(16, 900);
    store.put("a", json!(1), TtlStrategy::FixedTtl);
    store.clear();

    assert_eq!(store.get("a"), None);
    assert_eq!(store.stats().entry_count, 0);
  }

  #[test]
  fn test_fingerprint_is_order_insensitive() {
    // serde_json maps are sorted, so semantically equal objects built in
    // different key orders fingerprint identically.
    let a = json!({"x": 1, "y": 2});
    let b = json!({"y": 2, "x": 1});
    assert_eq!(fingerprint(&a), fingerprint(&b));
  }
}
