use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
///
/// Every section has sensible defaults; a missing config file means the
/// display starts with the built-in clock mode and memory-only caching.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub display: DisplayConfig,
  pub modes: Vec<ModeConfig>,
  pub cache: CacheConfig,
  pub fetch: FetchConfig,
  pub graceful: GracefulConfig,
  pub logging: LoggingConfig,
}

/// Physical display geometry and rotation pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
  /// Display width in pixels.
  pub width: u32,
  /// Delay between frames in milliseconds (render loop cadence).
  pub frame_delay_ms: u64,
  /// Scroll speed in pixels per frame.
  pub scroll_speed: u32,
  /// Extra fraction of a scroll pass added to dynamic durations.
  pub duration_buffer: f64,
  /// Lower clamp for computed mode durations.
  pub min_duration_seconds: u64,
  /// Upper clamp for computed mode durations.
  pub max_duration_seconds: u64,
}

impl Default for DisplayConfig {
  fn default() -> Self {
    Self {
      width: 64,
      frame_delay_ms: 100,
      scroll_speed: 2,
      duration_buffer: 0.1,
      min_duration_seconds: 10,
      max_duration_seconds: 120,
    }
  }
}

/// Content category of a display mode; live modes may preempt rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeCategory {
  /// An in-progress event (live game, breaking ticker).
  Live,
  /// Recently completed content (final scores).
  Recent,
  /// Scheduled future content (upcoming games).
  Upcoming,
  /// Always-relevant content (clock, weather, news).
  Ambient,
}

impl ModeCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      ModeCategory::Live => "live",
      ModeCategory::Recent => "recent",
      ModeCategory::Upcoming => "upcoming",
      ModeCategory::Ambient => "ambient",
    }
  }
}

/// One display mode entry in the rotation, in configured order.
#[derive(Debug, Clone, Deserialize)]
pub struct ModeConfig {
  pub id: String,
  pub category: ModeCategory,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Fixed on-screen time; omit to compute dynamically from content width.
  pub duration_seconds: Option<u64>,
  /// Whether this mode may preempt rotation when it reports a live event.
  #[serde(default)]
  pub live_priority: bool,
}

fn default_enabled() -> bool {
  true
}

/// Cache sizing and TTL strategy parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Soft cap on entry count before LRU eviction.
  pub max_entries: usize,
  /// TTL for the `fixed` strategy.
  pub fixed_ttl_seconds: u64,
  /// Entries unaccessed for this long become eviction candidates.
  pub access_horizon_seconds: u64,
  /// Persist entries to SQLite for warm starts.
  pub persist: bool,
  pub market: MarketConfig,
  /// Per-sport live refresh intervals in seconds, keyed by sport prefix.
  #[serde(deserialize_with = "deserialize_lowercase_map")]
  pub live_update_interval: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 512,
      fixed_ttl_seconds: 300,
      access_horizon_seconds: 900,
      persist: false,
      market: MarketConfig::default(),
      live_update_interval: BTreeMap::new(),
    }
  }
}

fn deserialize_lowercase_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let m: BTreeMap<String, u64> = BTreeMap::deserialize(deserializer)?;
  Ok(m.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

/// Exchange hours for the market-aware TTL strategy.
///
/// Times are exchange-local, expressed against a fixed UTC offset. Holidays
/// are full-day closures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
  pub open_hour: u32,
  pub open_minute: u32,
  pub close_hour: u32,
  pub close_minute: u32,
  pub utc_offset_hours: i32,
  pub open_ttl_seconds: u64,
  pub closed_ttl_seconds: u64,
  pub holidays: Vec<NaiveDate>,
}

impl Default for MarketConfig {
  fn default() -> Self {
    Self {
      open_hour: 9,
      open_minute: 30,
      close_hour: 16,
      close_minute: 0,
      utc_offset_hours: -5,
      open_ttl_seconds: 60,
      closed_ttl_seconds: 3600,
      holidays: Vec::new(),
    }
  }
}

/// Background fetch pool sizing and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  /// Number of fetch workers.
  pub workers: usize,
  /// Queued requests beyond this are rejected (caller serves stale cache).
  pub queue_capacity: usize,
  /// Per-attempt cooperative timeout.
  pub timeout_seconds: u64,
  /// Default retry count for requests that don't specify one.
  pub max_retries: u32,
  /// Base for exponential retry backoff.
  pub backoff_base_ms: u64,
  /// Upper bound on a single backoff sleep.
  pub backoff_cap_ms: u64,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      workers: 3,
      queue_capacity: 32,
      timeout_seconds: 30,
      max_retries: 2,
      backoff_base_ms: 250,
      backoff_cap_ms: 8_000,
    }
  }
}

/// Scroll-aware update deferral.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GracefulConfig {
  /// Deferred updates apply anyway once a region has reported no scroll
  /// activity for this long.
  pub inactivity_threshold_ms: u64,
}

impl Default for GracefulConfig {
  fn default() -> Self {
    Self {
      inactivity_threshold_ms: 2_000,
    }
  }
}

/// Log file placement.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  pub dir: PathBuf,
  pub file: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      dir: PathBuf::from("logs"),
      file: "marquee.log".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./marquee.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/marquee/config.yaml
  ///
  /// A missing file (when no explicit path was given) yields the defaults;
  /// the display must come up even with no configuration at all.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("marquee.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("marquee").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_str(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_str(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }
}
