//! Display mode descriptors, the rotation schedule, and the collaborator
//! seam between the scheduler and concrete data sources.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use crate::cache::CacheStore;
use crate::config::{ModeCategory, ModeConfig};
use crate::fetch::FetchRequest;

/// Mode shown when configuration yields no valid rotation entries.
pub const FALLBACK_MODE_ID: &str = "clock";

/// A renderable frame handed to the pixel pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub mode_id: String,
  pub text: String,
  /// Rendered content width in pixels; feeds dynamic durations.
  pub width_px: u32,
}

/// One display mode's rotation entry, built from configuration at startup.
/// Immutable during a rotation cycle; replaced wholesale on reload.
#[derive(Debug, Clone)]
pub struct ModeDescriptor {
  pub id: String,
  pub category: ModeCategory,
  /// Fixed on-screen time; `None` means compute from content width.
  pub fixed_duration: Option<Duration>,
  /// Whether this mode may preempt rotation when it reports a live event.
  pub live_priority: bool,
}

impl ModeDescriptor {
  pub fn from_config(cfg: &ModeConfig) -> Self {
    Self {
      id: cfg.id.clone(),
      category: cfg.category,
      fixed_duration: cfg.duration_seconds.map(Duration::from_secs),
      live_priority: cfg.live_priority,
    }
  }

  /// The built-in ambient clock entry.
  pub fn fallback() -> Self {
    Self {
      id: FALLBACK_MODE_ID.to_string(),
      category: ModeCategory::Ambient,
      fixed_duration: None,
      live_priority: false,
    }
  }
}

/// The interface every display mode implements.
///
/// One implementation per content source, registered with the scheduler at
/// startup; the scheduler itself never branches on mode names.
pub trait ModeCollaborator: Send + Sync {
  fn mode_id(&self) -> &str;

  /// Whether this mode can currently produce content. A mode that reports
  /// false is skipped for its rotation slot (an adapter with no games
  /// today, for example).
  fn is_enabled(&self) -> bool {
    true
  }

  /// Render a frame from the current cache state. Must not block on I/O;
  /// stale data is rendered as-is while a refresh runs in the background.
  fn render_current(&self, cache: &CacheStore) -> Result<Frame>;

  /// Width in pixels of the content this mode currently scrolls.
  /// Zero means static content.
  fn content_width(&self, _cache: &CacheStore) -> u32 {
    0
  }

  /// The cache key backing this mode, when it renders remote data.
  fn cache_key(&self) -> Option<String> {
    None
  }

  /// A request to refresh this mode's data. Expected whenever `cache_key`
  /// returns `Some`.
  fn fetch_request(&self) -> Option<FetchRequest> {
    None
  }

  /// The render region this mode draws into, for scroll-aware deferral.
  fn region_id(&self) -> &str {
    "main"
  }
}

/// Ordered list of enabled modes; insertion order is display order.
///
/// Never empty: when configuration yields nothing valid, the built-in
/// clock mode fills in.
#[derive(Debug, Clone)]
pub struct RotationSchedule {
  entries: Vec<ModeDescriptor>,
}

impl RotationSchedule {
  /// Build from configuration, dropping invalid entries with a warning:
  /// duplicates, modes without a registered collaborator, and zero-length
  /// fixed durations. Disabled modes are skipped silently (that's
  /// configuration, not an error).
  pub fn from_config(modes: &[ModeConfig], has_collaborator: impl Fn(&str) -> bool) -> Self {
    let mut entries = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for mode in modes {
      if !mode.enabled {
        continue;
      }
      if seen.contains(mode.id.as_str()) {
        warn!(mode_id = %mode.id, "Duplicate mode entry in schedule; dropping");
        continue;
      }
      if !has_collaborator(&mode.id) {
        warn!(mode_id = %mode.id, "Schedule references unknown mode; dropping");
        continue;
      }
      if mode.duration_seconds == Some(0) {
        warn!(mode_id = %mode.id, "Mode has zero duration; dropping");
        continue;
      }

      seen.insert(&mode.id);
      entries.push(ModeDescriptor::from_config(mode));
    }

    if entries.is_empty() {
      warn!("No valid modes configured; falling back to built-in clock");
      entries.push(ModeDescriptor::fallback());
    }

    Self { entries }
  }

  pub fn entries(&self) -> &[ModeDescriptor] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Entry at `index`, wrapping past the end.
  pub fn entry(&self, index: usize) -> &ModeDescriptor {
    &self.entries[index % self.entries.len()]
  }

  pub fn position(&self, mode_id: &str) -> Option<usize> {
    self.entries.iter().position(|d| d.id == mode_id)
  }
}

/// An active live event reported by a mode's data source.
#[derive(Debug, Clone)]
pub struct LiveSignal {
  pub mode_id: String,
  pub detected_at: DateTime<Utc>,
}

/// Shared board of active live events.
///
/// Written by data-source adapters whenever live-category data refreshes;
/// read by the scheduler each tick. An entry's absence means no event.
#[derive(Default)]
pub struct LiveSignalBoard {
  inner: Mutex<HashMap<String, LiveSignal>>,
}

impl LiveSignalBoard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Report an active live event for `mode_id`. The original detection
  /// time is kept if the event is already known.
  pub fn set_live(&self, mode_id: &str) {
    let mut inner = self.lock();
    inner
      .entry(mode_id.to_string())
      .or_insert_with(|| LiveSignal {
        mode_id: mode_id.to_string(),
        detected_at: Utc::now(),
      });
  }

  /// Report that `mode_id`'s event has ended.
  pub fn clear(&self, mode_id: &str) {
    self.lock().remove(mode_id);
  }

  pub fn is_live(&self, mode_id: &str) -> bool {
    self.lock().contains_key(mode_id)
  }

  pub fn signal(&self, mode_id: &str) -> Option<LiveSignal> {
    self.lock().get(mode_id).cloned()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, LiveSignal>> {
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }
}
