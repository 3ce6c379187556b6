//! On-screen duration resolution for display modes.

use std::time::Duration;

use crate::config::DisplayConfig;

/// Display geometry and pacing inputs for duration computation.
#[derive(Debug, Clone)]
pub struct DurationParams {
  display_width: u32,
  scroll_speed: u32,
  frame_delay: Duration,
  duration_buffer: f64,
  min: Duration,
  max: Duration,
}

impl DurationParams {
  pub fn from_config(cfg: &DisplayConfig) -> Self {
    Self {
      display_width: cfg.width,
      // A zero scroll speed would make every pass infinite
      scroll_speed: cfg.scroll_speed.max(1),
      frame_delay: Duration::from_millis(cfg.frame_delay_ms),
      duration_buffer: cfg.duration_buffer.max(0.0),
      min: Duration::from_secs(cfg.min_duration_seconds),
      max: Duration::from_secs(cfg.max_duration_seconds),
    }
  }

  /// Fixed duration when configured, otherwise computed from content width.
  pub fn resolve(&self, fixed: Option<Duration>, content_width: u32) -> Duration {
    fixed.unwrap_or_else(|| self.dynamic_duration(content_width))
  }

  /// Time for one full scroll pass plus the configured buffer, clamped to
  /// `[min, max]`. The content is shown exactly long enough to complete a
  /// pass without being cut off, and never loops pointlessly.
  ///
  /// Static content (`content_width == 0`) gets exactly the minimum.
  pub fn dynamic_duration(&self, content_width: u32) -> Duration {
    if content_width == 0 {
      return self.min;
    }

    let frames =
      ((self.display_width + content_width) as f64 / self.scroll_speed as f64).ceil();
    let secs = frames * self.frame_delay.as_secs_f64() * (1.0 + self.duration_buffer);

    Duration::from_secs_f64(secs).clamp(self.min, self.max)
  }
}
