//! Built-in ambient clock mode.
//!
//! Renders local time with no remote data, which also makes it the
//! fallback entry when configuration yields no valid rotation.

use chrono::Local;
use color_eyre::Result;

use crate::cache::CacheStore;
use crate::scheduler::{Frame, ModeCollaborator, FALLBACK_MODE_ID};

pub struct ClockMode {
  format: String,
}

impl ClockMode {
  pub fn new() -> Self {
    Self {
      format: "%H:%M".to_string(),
    }
  }

  /// Use a custom strftime format.
  pub fn with_format(mut self, format: impl Into<String>) -> Self {
    self.format = format.into();
    self
  }
}

impl Default for ClockMode {
  fn default() -> Self {
    Self::new()
  }
}

impl ModeCollaborator for ClockMode {
  fn mode_id(&self) -> &str {
    FALLBACK_MODE_ID
  }

  fn render_current(&self, _cache: &CacheStore) -> Result<Frame> {
    Ok(Frame {
      mode_id: FALLBACK_MODE_ID.to_string(),
      text: Local::now().format(&self.format).to_string(),
      width_px: 0,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CacheConfig;

  #[test]
  fn test_clock_renders_static_content() {
    let cache = CacheStore::new(&CacheConfig::default());
    let frame = ClockMode::new().render_current(&cache).unwrap();

    assert_eq!(frame.mode_id, "clock");
    assert!(!frame.text.is_empty());
    assert_eq!(frame.width_px, 0);
  }

  #[test]
  fn test_custom_format() {
    let cache = CacheStore::new(&CacheConfig::default());
    let frame = ClockMode::new()
      .with_format("%Y")
      .render_current(&cache)
      .unwrap();

    assert_eq!(frame.text.len(), 4);
  }
}
