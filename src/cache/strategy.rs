//! TTL strategy selection for cached display data.
//!
//! Different content ages at different rates: a stock quote cannot change
//! while the exchange is closed, and a live game updates on a per-sport
//! cadence. The strategy decides how long an entry stays fresh at the moment
//! it is stored; change detection never shortens the chosen TTL.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::config::{CacheConfig, MarketConfig};

/// Per-sport fallback intervals (seconds) when configuration has no entry.
/// Keyed by the sport prefix of the cache key, e.g. `nfl:scoreboard`.
const DEFAULT_LIVE_INTERVALS: &[(&str, u64)] = &[
  ("mlb", 20),
  ("nba", 15),
  ("ncaaf", 30),
  ("ncaam", 30),
  ("nfl", 30),
  ("nhl", 15),
  ("soccer", 30),
];

/// Fallback for sports absent from both configuration and the default table.
const DEFAULT_LIVE_INTERVAL_SECS: u64 = 30;

/// How a cache entry's time-to-live is chosen when it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStrategy {
  /// Constant TTL from configuration.
  FixedTtl,
  /// Short TTL during open-market hours, long TTL otherwise.
  MarketAware,
  /// Per-sport TTL resolved from the cache key's sport prefix.
  SportLiveInterval,
}

impl TtlStrategy {
  /// Stable tag used for persistence.
  pub fn as_str(&self) -> &'static str {
    match self {
      TtlStrategy::FixedTtl => "fixed",
      TtlStrategy::MarketAware => "market",
      TtlStrategy::SportLiveInterval => "sport_live",
    }
  }

  /// Parse a persisted tag. Unknown tags fall back to `FixedTtl` so an old
  /// cache file never prevents startup.
  pub fn parse(tag: &str) -> Self {
    match tag {
      "market" => TtlStrategy::MarketAware,
      "sport_live" => TtlStrategy::SportLiveInterval,
      _ => TtlStrategy::FixedTtl,
    }
  }
}

/// Exchange calendar for market-aware TTLs.
///
/// Markets are considered open on weekdays between the configured open and
/// close times (exchange-local, expressed as a fixed UTC offset), excluding
/// configured holidays.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
  open_minute: u32,
  close_minute: u32,
  utc_offset_hours: i32,
  holidays: BTreeSet<NaiveDate>,
}

impl MarketCalendar {
  pub fn from_config(cfg: &MarketConfig) -> Self {
    Self {
      open_minute: cfg.open_hour * 60 + cfg.open_minute,
      close_minute: cfg.close_hour * 60 + cfg.close_minute,
      utc_offset_hours: cfg.utc_offset_hours,
      holidays: cfg.holidays.iter().copied().collect(),
    }
  }

  /// Whether the exchange is open at the given instant.
  pub fn is_open(&self, now: DateTime<Utc>) -> bool {
    let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
      .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    let local = now.with_timezone(&offset);

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
      return false;
    }
    if self.holidays.contains(&local.date_naive()) {
      return false;
    }

    let minute = local.hour() * 60 + local.minute();
    minute >= self.open_minute && minute < self.close_minute
  }
}

/// Resolves the TTL for a cache key under a given strategy.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
  fixed_ttl: Duration,
  market_open_ttl: Duration,
  market_closed_ttl: Duration,
  market: MarketCalendar,
  live_intervals: BTreeMap<String, u64>,
}

impl TtlPolicy {
  pub fn from_config(cfg: &CacheConfig) -> Self {
    Self {
      fixed_ttl: Duration::from_secs(cfg.fixed_ttl_seconds),
      market_open_ttl: Duration::from_secs(cfg.market.open_ttl_seconds),
      market_closed_ttl: Duration::from_secs(cfg.market.closed_ttl_seconds),
      market: MarketCalendar::from_config(&cfg.market),
      live_intervals: cfg.live_update_interval.clone(),
    }
  }

  /// TTL for `key` stored now under `strategy`.
  pub fn resolve(&self, key: &str, strategy: TtlStrategy, now: DateTime<Utc>) -> Duration {
    match strategy {
      TtlStrategy::FixedTtl => self.fixed_ttl,
      TtlStrategy::MarketAware => {
        if self.market.is_open(now) {
          self.market_open_ttl
        } else {
          self.market_closed_ttl
        }
      }
      TtlStrategy::SportLiveInterval => self.sport_interval(key),
    }
  }

  /// Look up the live interval for the sport prefix of `key`.
  ///
  /// Configuration wins; absent that, the hard-coded default table; absent
  /// that, a generic interval.
  fn sport_interval(&self, key: &str) -> Duration {
    let sport = key.split(':').next().unwrap_or_default().to_lowercase();

    let secs = self.live_intervals.get(&sport).copied().unwrap_or_else(|| {
      DEFAULT_LIVE_INTERVALS
        .iter()
        .find(|(name, _)| *name == sport)
        .map(|(_, secs)| *secs)
        .unwrap_or(DEFAULT_LIVE_INTERVAL_SECS)
    });

    Duration::from_secs(secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn test_policy() -> TtlPolicy {
    let mut cfg = CacheConfig::default();
    cfg.fixed_ttl_seconds = 300;
    cfg.market.utc_offset_hours = -4; // exchange-local summer offset
    cfg.market.open_ttl_seconds = 60;
    cfg.market.closed_ttl_seconds = 3600;
    // 2026-07-03 is a configured holiday (observed Independence Day)
    cfg.market.holidays = vec![NaiveDate::from_ymd_opt(2026, 7, 3).unwrap()];
    cfg.live_update_interval.insert("nfl".to_string(), 25);
    TtlPolicy::from_config(&cfg)
  }

  /// 2026-08-05 is a Wednesday; 15:00 UTC is 11:00 exchange-local.
  fn weekday_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 5, 15, 0, 0).unwrap()
  }

  #[test]
  fn test_fixed_ttl_is_constant() {
    let policy = test_policy();
    let ttl = policy.resolve("stocks:AAPL", TtlStrategy::FixedTtl, weekday_open());
    assert_eq!(ttl, Duration::from_secs(300));
  }

  #[test]
  fn test_market_open_uses_short_ttl() {
    let policy = test_policy();
    let ttl = policy.resolve("stocks:AAPL", TtlStrategy::MarketAware, weekday_open());
    assert_eq!(ttl, Duration::from_secs(60));
  }

  #[test]
  fn test_market_closed_after_hours() {
    let policy = test_policy();
    // 23:00 UTC on a Wednesday = 19:00 exchange-local, after the 16:00 close
    let now = Utc.with_ymd_and_hms(2026, 8, 5, 23, 0, 0).unwrap();
    let ttl = policy.resolve("stocks:AAPL", TtlStrategy::MarketAware, now);
    assert_eq!(ttl, Duration::from_secs(3600));
  }

  #[test]
  fn test_market_closed_on_weekend() {
    let policy = test_policy();
    // 2026-08-08 is a Saturday
    let now = Utc.with_ymd_and_hms(2026, 8, 8, 15, 0, 0).unwrap();
    let ttl = policy.resolve("stocks:AAPL", TtlStrategy::MarketAware, now);
    assert_eq!(ttl, Duration::from_secs(3600));
  }

  #[test]
  fn test_market_closed_on_holiday() {
    let policy = test_policy();
    // 2026-07-03 is a Friday but configured as a holiday
    let now = Utc.with_ymd_and_hms(2026, 7, 3, 15, 0, 0).unwrap();
    let ttl = policy.resolve("stocks:AAPL", TtlStrategy::MarketAware, now);
    assert_eq!(ttl, Duration::from_secs(3600));
  }

  #[test]
  fn test_market_boundary_minutes() {
    let policy = test_policy();
    // 13:30 UTC = 09:30 exchange-local, exactly the open
    let at_open = Utc.with_ymd_and_hms(2026, 8, 5, 13, 30, 0).unwrap();
    assert_eq!(
      policy.resolve("stocks:AAPL", TtlStrategy::MarketAware, at_open),
      Duration::from_secs(60)
    );
    // 20:00 UTC = 16:00 exchange-local, exactly the close (exclusive)
    let at_close = Utc.with_ymd_and_hms(2026, 8, 5, 20, 0, 0).unwrap();
    assert_eq!(
      policy.resolve("stocks:AAPL", TtlStrategy::MarketAware, at_close),
      Duration::from_secs(3600)
    );
  }

  #[test]
  fn test_sport_interval_from_config() {
    let policy = test_policy();
    let ttl = policy.resolve(
      "nfl:scoreboard:2026-08-05",
      TtlStrategy::SportLiveInterval,
      weekday_open(),
    );
    assert_eq!(ttl, Duration::from_secs(25));
  }

  #[test]
  fn test_sport_interval_from_default_table() {
    let policy = test_policy();
    let ttl = policy.resolve(
      "nhl:scoreboard:2026-08-05",
      TtlStrategy::SportLiveInterval,
      weekday_open(),
    );
    assert_eq!(ttl, Duration::from_secs(15));
  }

  #[test]
  fn test_sport_interval_unknown_sport_falls_back() {
    let policy = test_policy();
    let ttl = policy.resolve(
      "cricket:scoreboard",
      TtlStrategy::SportLiveInterval,
      weekday_open(),
    );
    assert_eq!(ttl, Duration::from_secs(DEFAULT_LIVE_INTERVAL_SECS));
  }

  #[test]
  fn test_strategy_tag_roundtrip() {
    for strategy in [
      TtlStrategy::FixedTtl,
      TtlStrategy::MarketAware,
      TtlStrategy::SportLiveInterval,
    ] {
      assert_eq!(TtlStrategy::parse(strategy.as_str()), strategy);
    }
    assert_eq!(TtlStrategy::parse("garbage"), TtlStrategy::FixedTtl);
  }
}
