//! Adaptive caching for display content.
//!
//! This module is the single source of truth for "is this data fresh enough
//! to render without a network call". It provides:
//! - TTL-stamped entries with strategy-aware expiry (fixed, market hours,
//!   per-sport live intervals)
//! - Content fingerprints so consumers can detect real changes without
//!   waiting for TTL expiry
//! - LRU eviction under a soft entry cap
//! - Optional SQLite-backed persistence for warm starts

mod storage;
mod store;
mod strategy;

pub use storage::{CacheStorage, NoopStorage, PersistedEntry, SqliteStorage};
pub use store::{fingerprint, CacheSnapshot, CacheStats, CacheStore};
pub use strategy::{MarketCalendar, TtlPolicy, TtlStrategy};
