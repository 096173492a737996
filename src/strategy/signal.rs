//! Signal Filter - deterministic pivot/candle confluence rules

use serde::{Deserialize, Serialize};

use crate::features::FeatureRecord;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    None,
    Long,
    Short,
}

impl Signal {
    /// Numeric encoding used as a model feature: +1 long, -1 short, 0 none
    pub fn value(&self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::None => None,
            Self::Long => Some(Direction::Long),
            Self::Short => Some(Direction::Short),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Evaluates the rule set against a closed bar's record
#[derive(Debug, Clone, Copy)]
pub struct SignalFilter {
    /// Pivot proximity tolerance in ATR multiples
    proximity: f64,
}

impl SignalFilter {
    pub fn new(proximity: f64) -> Self {
        Self { proximity }
    }

    /// Long needs an uptrend, a bullish candle and the low near S1/S2.
    /// Short needs a downtrend, a bearish engulfing and the high near R1/R2;
    /// hammers only ever trigger longs. Long wins if both somehow hold.
    pub fn evaluate(&self, record: &FeatureRecord) -> Signal {
        let band = self.proximity * record.atr;
        let near = |price: f64, level: f64| (price - level).abs() < band;
        let bar = &record.bar;
        let levels = &record.pivots;

        let long = record.ema_fast > record.ema_slow
            && (record.engulfing > 0 || record.hammer > 0)
            && (near(bar.low, levels.s1) || near(bar.low, levels.s2));
        if long {
            return Signal::Long;
        }

        let short = record.ema_fast < record.ema_slow
            && record.engulfing < 0
            && (near(bar.high, levels.r1) || near(bar.high, levels.r2));
        if short {
            return Signal::Short;
        }

        Signal::None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{IndicatorPeriods, PivotLevels, Sessions};
    use crate::types::Bar;
    use chrono::{TimeZone, Utc};

    /// Record with s1 = 1000, r1 = 1020, far-away s2/r2, ATR 4
    pub(crate) fn record(ema_fast: f64, ema_slow: f64, engulfing: i32, hammer: i32, low: f64, high: f64) -> FeatureRecord {
        FeatureRecord {
            bar: Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap(),
                open: (low + high) / 2.0,
                high,
                low,
                close: (low + high) / 2.0,
                volume: 500.0,
            },
            pivots: PivotLevels {
                pivot: 1010.0,
                r1: 1020.0,
                s1: 1000.0,
                r2: 1100.0,
                s2: 900.0,
                r3: 1200.0,
                s3: 800.0,
            },
            ema_fast,
            ema_slow,
            atr: 4.0,
            engulfing,
            hammer,
            hour: 14,
            day_of_week: 1,
            sessions: Sessions::at_hour(14),
            periods: IndicatorPeriods::default(),
        }
    }

    #[test]
    fn test_long_near_support() {
        let filter = SignalFilter::new(0.7);
        // |998 - 1000| = 2 < 0.7 * 4
        let r = record(105.0, 100.0, 50, 0, 998.0, 1005.0);
        assert_eq!(filter.evaluate(&r), Signal::Long);
    }

    #[test]
    fn test_hammer_triggers_long() {
        let filter = SignalFilter::new(0.7);
        let r = record(105.0, 100.0, 0, 100, 999.0, 1005.0);
        assert_eq!(filter.evaluate(&r), Signal::Long);
    }

    #[test]
    fn test_long_outside_tolerance() {
        let filter = SignalFilter::new(0.5);
        // |997.5 - 1000| = 2.5 > 2.0
        let r = record(105.0, 100.0, 100, 0, 997.5, 1005.0);
        assert_eq!(filter.evaluate(&r), Signal::None);
    }

    #[test]
    fn test_long_requires_uptrend() {
        let filter = SignalFilter::new(0.7);
        let r = record(99.0, 100.0, 100, 0, 998.0, 1005.0);
        assert_eq!(filter.evaluate(&r), Signal::None);
    }

    #[test]
    fn test_short_near_resistance() {
        let filter = SignalFilter::new(0.7);
        let r = record(95.0, 100.0, -100, 0, 1010.0, 1021.0);
        assert_eq!(filter.evaluate(&r), Signal::Short);
    }

    #[test]
    fn test_hammer_never_triggers_short() {
        let filter = SignalFilter::new(0.7);
        let r = record(95.0, 100.0, 0, 100, 1010.0, 1021.0);
        assert_eq!(filter.evaluate(&r), Signal::None);
    }

    #[test]
    fn test_evaluation_is_pure() {
        let filter = SignalFilter::new(0.7);
        let r = record(105.0, 100.0, 50, 0, 998.0, 1005.0);
        assert_eq!(filter.evaluate(&r), filter.evaluate(&r));
    }

    #[test]
    fn test_signal_encoding() {
        assert_eq!(Signal::Long.value(), 1.0);
        assert_eq!(Signal::Short.value(), -1.0);
        assert_eq!(Signal::None.direction(), None);
        assert_eq!(Signal::Short.direction(), Some(Direction::Short));
    }
}
