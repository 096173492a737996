//! Daily floor-trader pivots.
//!
//! Bars are aggregated into UTC calendar days; each bar receives the levels
//! computed from the most recent *earlier* day that has bars, so a bar never
//! sees its own day's high, low or close.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
    pub r2: f64,
    pub s2: f64,
    pub r3: f64,
    pub s3: f64,
}

impl PivotLevels {
    /// Levels from a completed day's high, low and close
    pub fn from_hlc(high: f64, low: f64, close: f64) -> Self {
        let pivot = (high + low + close) / 3.0;
        let range = high - low;
        Self {
            pivot,
            r1: 2.0 * pivot - low,
            s1: 2.0 * pivot - high,
            r2: pivot + range,
            s2: pivot - range,
            r3: high + 2.0 * (pivot - low),
            s3: low - 2.0 * range,
        }
    }
}

/// High/low/close of one calendar day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Resample ordered bars into per-day aggregates (days without bars are absent)
pub fn daily_aggregates(bars: &[Bar]) -> Vec<DailyAggregate> {
    let mut days: Vec<DailyAggregate> = Vec::new();

    for bar in bars {
        let date = bar.timestamp.date_naive();
        match days.last_mut() {
            Some(day) if day.date == date => {
                day.high = day.high.max(bar.high);
                day.low = day.low.min(bar.low);
                day.close = bar.close;
            }
            _ => days.push(DailyAggregate {
                date,
                high: bar.high,
                low: bar.low,
                close: bar.close,
            }),
        }
    }

    days
}

/// Pivot levels per bar, as-of joined from the previous trading day.
///
/// Bars of the first day in the window get `None`.
pub fn daily_pivots(bars: &[Bar]) -> Vec<Option<PivotLevels>> {
    let days = daily_aggregates(bars);

    // levels[i] applies to days[i], built from days[i - 1]
    let levels: Vec<Option<PivotLevels>> = std::iter::once(None)
        .chain(
            days.windows(2)
                .map(|w| Some(PivotLevels::from_hlc(w[0].high, w[0].low, w[0].close))),
        )
        .collect();

    let mut out = Vec::with_capacity(bars.len());
    let mut day_idx = 0;
    for bar in bars {
        let date = bar.timestamp.date_naive();
        while day_idx < days.len() && days[day_idx].date < date {
            day_idx += 1;
        }
        out.push(levels.get(day_idx).copied().flatten());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(day: u32, hour: u32, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_formula() {
        let levels = PivotLevels::from_hlc(110.0, 90.0, 100.0);
        assert_eq!(levels.pivot, 100.0);
        assert_eq!(levels.r1, 110.0);
        assert_eq!(levels.s1, 90.0);
        assert_eq!(levels.r2, 120.0);
        assert_eq!(levels.s2, 80.0);
        assert_eq!(levels.r3, 130.0);
        assert_eq!(levels.s3, 50.0);
    }

    #[test]
    fn test_first_day_has_no_levels() {
        let bars = vec![bar(4, 0, 10.0, 9.0, 9.5), bar(4, 1, 11.0, 9.0, 10.0)];
        assert!(daily_pivots(&bars).iter().all(Option::is_none));
    }

    #[test]
    fn test_levels_come_from_previous_day_only() {
        let bars = vec![
            bar(4, 22, 110.0, 95.0, 98.0),
            bar(4, 23, 105.0, 90.0, 100.0),
            bar(5, 0, 500.0, 1.0, 250.0),
            bar(5, 1, 600.0, 2.0, 300.0),
        ];
        let pivots = daily_pivots(&bars);
        let expected = PivotLevels::from_hlc(110.0, 90.0, 100.0);

        // identical for every bar of the day, untouched by that day's extremes
        assert_eq!(pivots[2], Some(expected));
        assert_eq!(pivots[3], Some(expected));
    }

    #[test]
    fn test_weekend_gap_uses_last_trading_day() {
        // Friday 8th, then Monday 11th
        let bars = vec![
            bar(8, 10, 120.0, 100.0, 110.0),
            bar(11, 0, 130.0, 125.0, 126.0),
        ];
        let pivots = daily_pivots(&bars);
        assert_eq!(pivots[1], Some(PivotLevels::from_hlc(120.0, 100.0, 110.0)));
    }

    #[test]
    fn test_daily_aggregates() {
        let bars = vec![
            bar(4, 0, 10.0, 8.0, 9.0),
            bar(4, 1, 12.0, 9.0, 11.0),
            bar(5, 0, 13.0, 10.0, 12.0),
        ];
        let days = daily_aggregates(&bars);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].high, 12.0);
        assert_eq!(days[0].low, 8.0);
        assert_eq!(days[0].close, 11.0);
    }
}
