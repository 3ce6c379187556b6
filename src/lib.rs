//! marquee: the rotation and caching core for LED matrix content displays.
//!
//! The display cycles through configured modes (clock, weather, scores,
//! tickers) at a fixed frame cadence. This crate owns the hard part of that:
//! deciding what shows when, keeping remote data fresh without ever blocking
//! a frame, and never mutating content mid-scroll.
//!
//! - [`scheduler`] — rotation order, dynamic durations, live-event
//!   preemption, and on-demand overrides
//! - [`cache`] — TTL- and strategy-aware store with content fingerprints
//!   and LRU eviction
//! - [`fetch`] — bounded background worker pool with per-key deduplication
//!   and retry/backoff
//! - [`graceful`] — scroll-aware deferral of content mutations
//!
//! Data-source adapters implement [`scheduler::ModeCollaborator`] and are
//! registered with the [`scheduler::RotationScheduler`] at startup; the
//! pixel pipeline consumes the frames the run loop emits.

pub mod cache;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod graceful;
pub mod logging;
pub mod scheduler;
