//! Two-bar candlestick patterns.
//!
//! Scores are signed: +100 bullish, -100 bearish, 0 no pattern.

use crate::types::Bar;

pub const PATTERN_STRENGTH: i32 = 100;

/// Hammer: body no larger than this fraction of the range
const HAMMER_MAX_BODY_RATIO: f64 = 0.3;
/// Hammer: lower shadow at least this many bodies long
const HAMMER_MIN_LOWER_SHADOW: f64 = 2.0;
/// Hammer: upper shadow no larger than this fraction of the range
const HAMMER_MAX_UPPER_RATIO: f64 = 0.1;
/// Hammer: body may sit this fraction of the previous range above its low
const HAMMER_NEAR_LOW_RATIO: f64 = 0.1;

/// Engulfing pattern on (`prev`, `cur`)
pub fn engulfing(prev: &Bar, cur: &Bar) -> i32 {
    if prev.is_bearish()
        && cur.is_bullish()
        && cur.close >= prev.open
        && cur.open <= prev.close
        && (cur.close > prev.open || cur.open < prev.close)
    {
        return PATTERN_STRENGTH;
    }

    if prev.is_bullish()
        && cur.is_bearish()
        && cur.open >= prev.close
        && cur.close <= prev.open
        && (cur.open > prev.close || cur.close < prev.open)
    {
        return -PATTERN_STRENGTH;
    }

    0
}

/// Hammer on `cur`, which must print at or near the lows of `prev`
pub fn hammer(prev: &Bar, cur: &Bar) -> i32 {
    let range = cur.range();
    if range <= 0.0 {
        return 0;
    }

    let body = cur.body();
    let body_low = cur.open.min(cur.close);
    let body_high = cur.open.max(cur.close);
    let lower_shadow = body_low - cur.low;
    let upper_shadow = cur.high - body_high;

    let small_body = body <= HAMMER_MAX_BODY_RATIO * range;
    let long_lower = lower_shadow >= HAMMER_MIN_LOWER_SHADOW * body && lower_shadow > 0.0;
    let short_upper = upper_shadow <= HAMMER_MAX_UPPER_RATIO * range;
    let near_low = body_low <= prev.low + HAMMER_NEAR_LOW_RATIO * prev.range();

    if small_body && long_lower && short_upper && near_low {
        PATTERN_STRENGTH
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_bullish_engulfing() {
        let prev = candle(10.0, 10.5, 8.5, 9.0);
        let cur = candle(8.8, 11.0, 8.7, 10.5);
        assert_eq!(engulfing(&prev, &cur), 100);
    }

    #[test]
    fn test_bearish_engulfing() {
        let prev = candle(9.0, 10.5, 8.5, 10.0);
        let cur = candle(10.2, 10.4, 8.0, 8.5);
        assert_eq!(engulfing(&prev, &cur), -100);
    }

    #[test]
    fn test_equal_bodies_do_not_engulf() {
        let prev = candle(10.0, 10.5, 8.5, 9.0);
        let cur = candle(9.0, 10.5, 8.5, 10.0);
        assert_eq!(engulfing(&prev, &cur), 0);
    }

    #[test]
    fn test_same_color_is_not_engulfing() {
        let prev = candle(9.0, 10.5, 8.5, 10.0);
        let cur = candle(8.5, 11.5, 8.0, 11.0);
        assert_eq!(engulfing(&prev, &cur), 0);
    }

    #[test]
    fn test_hammer_at_prior_low() {
        let prev = candle(102.0, 103.0, 100.0, 101.0);
        // range 10, body 1, lower shadow 8.5, upper 0.5
        let cur = candle(99.5, 101.0, 91.0, 100.5);
        assert_eq!(hammer(&prev, &cur), 100);
    }

    #[test]
    fn test_hammer_needs_long_lower_shadow() {
        let prev = candle(102.0, 103.0, 100.0, 101.0);
        let cur = candle(99.0, 104.0, 98.0, 103.0);
        assert_eq!(hammer(&prev, &cur), 0);
    }

    #[test]
    fn test_hammer_far_above_prior_low_is_ignored() {
        let prev = candle(102.0, 103.0, 100.0, 101.0);
        let cur = candle(109.5, 111.0, 101.0, 110.5);
        assert_eq!(hammer(&prev, &cur), 0);
    }

    #[test]
    fn test_flat_bar_is_not_hammer() {
        let prev = candle(1.0, 1.0, 1.0, 1.0);
        let cur = candle(1.0, 1.0, 1.0, 1.0);
        assert_eq!(hammer(&prev, &cur), 0);
    }
}
