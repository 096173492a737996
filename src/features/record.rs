//! Enriched per-bar record and its fixed feature schema.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::pivots::PivotLevels;
use crate::config::StrategyConfig;
use crate::types::Bar;

/// Every feature a [`FeatureRecord`] can provide, in canonical order
pub const FEATURE_NAMES: [&str; 22] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "pivot",
    "r1",
    "s1",
    "r2",
    "s2",
    "r3",
    "s3",
    "ema_fast",
    "ema_slow",
    "atr",
    "engulfing",
    "hammer",
    "hour",
    "day_of_week",
    "session_asia",
    "session_london",
    "session_ny",
];

/// Other names accepted for the bar volume (MT5 rate columns)
pub const VOLUME_ALIASES: [&str; 2] = ["real_volume", "tick_volume"];

/// Indicator periods a record was built with.
///
/// Period-suffixed names such as `ema50` or `atr14` resolve against these,
/// so models and corpora that spell the period out keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorPeriods {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self::from(&StrategyConfig::default())
    }
}

impl From<&StrategyConfig> for IndicatorPeriods {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            ema_fast: config.ema_fast,
            ema_slow: config.ema_slow,
            atr: config.atr_period,
        }
    }
}

impl IndicatorPeriods {
    /// Canonical schema name for `name`, or `None` if nothing provides it
    pub fn resolve(&self, name: &str) -> Option<&'static str> {
        if let Some(canonical) = FEATURE_NAMES.iter().copied().find(|n| *n == name) {
            return Some(canonical);
        }
        if VOLUME_ALIASES.iter().any(|alias| *alias == name) {
            return Some("volume");
        }
        if let Some(period) = period_suffix(name, "ema") {
            if period == self.ema_fast {
                return Some("ema_fast");
            }
            if period == self.ema_slow {
                return Some("ema_slow");
            }
        }
        match period_suffix(name, "atr") {
            Some(period) if period == self.atr => Some("atr"),
            _ => None,
        }
    }
}

fn period_suffix(name: &str, prefix: &str) -> Option<usize> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Session windows, inclusive UTC hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sessions {
    pub asia: bool,
    pub london: bool,
    pub new_york: bool,
}

impl Sessions {
    pub fn at_hour(hour: u32) -> Self {
        Self {
            asia: hour <= 8,
            london: (7..=16).contains(&hour),
            new_york: (12..=21).contains(&hour),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub bar: Bar,
    pub pivots: PivotLevels,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub atr: f64,
    pub engulfing: i32,
    pub hammer: i32,
    /// Hour of day, UTC
    pub hour: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub sessions: Sessions,
    pub periods: IndicatorPeriods,
}

impl FeatureRecord {
    /// Assemble a record, deriving time and session fields from the bar
    pub fn new(
        bar: Bar,
        pivots: PivotLevels,
        ema_fast: f64,
        ema_slow: f64,
        atr: f64,
        engulfing: i32,
        hammer: i32,
    ) -> Self {
        let hour = bar.timestamp.hour();
        Self {
            bar,
            pivots,
            ema_fast,
            ema_slow,
            atr,
            engulfing,
            hammer,
            hour,
            day_of_week: bar.timestamp.weekday().num_days_from_monday(),
            sessions: Sessions::at_hour(hour),
            periods: IndicatorPeriods::default(),
        }
    }

    pub fn with_periods(mut self, periods: IndicatorPeriods) -> Self {
        self.periods = periods;
        self
    }

    /// Look up a feature by schema name or alias. Booleans map to 0/1.
    pub fn feature(&self, name: &str) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let value = match self.periods.resolve(name)? {
            "open" => self.bar.open,
            "high" => self.bar.high,
            "low" => self.bar.low,
            "close" => self.bar.close,
            "volume" => self.bar.volume,
            "pivot" => self.pivots.pivot,
            "r1" => self.pivots.r1,
            "s1" => self.pivots.s1,
            "r2" => self.pivots.r2,
            "s2" => self.pivots.s2,
            "r3" => self.pivots.r3,
            "s3" => self.pivots.s3,
            "ema_fast" => self.ema_fast,
            "ema_slow" => self.ema_slow,
            "atr" => self.atr,
            "engulfing" => self.engulfing as f64,
            "hammer" => self.hammer as f64,
            "hour" => self.hour as f64,
            "day_of_week" => self.day_of_week as f64,
            "session_asia" => flag(self.sessions.asia),
            "session_london" => flag(self.sessions.london),
            "session_ny" => flag(self.sessions.new_york),
            _ => return None,
        };
        Some(value)
    }
}
