//! Trend and volatility indicators.
//!
//! Values are `None` until the indicator has enough history; a missing value
//! is never reported as zero.

use crate::types::Bar;

/// Exponential moving average of a series.
///
/// Seeded with the SMA of the first `period` values at index `period - 1`,
/// then `EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1]` with
/// `alpha = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut result = vec![None; n];

    if period == 0 || n < period {
        return result;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..n {
        let next = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = Some(next);
        prev = next;
    }

    result
}

/// True range series. Undefined for the first bar (no previous close).
pub fn true_range(bars: &[Bar]) -> Vec<Option<f64>> {
    let mut tr = vec![None; bars.len()];
    for i in 1..bars.len() {
        let h = bars[i].high;
        let l = bars[i].low;
        let pc = bars[i - 1].close;
        tr[i] = Some((h - l).max((h - pc).abs()).max((l - pc).abs()));
    }
    tr
}

/// Average true range with Wilder smoothing.
///
/// First value at index `period` is the mean of TR[1..=period];
/// afterwards `ATR[t] = (ATR[t-1] * (period - 1) + TR[t]) / period`.
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut result = vec![None; n];

    if period == 0 || n <= period {
        return result;
    }

    let tr: Vec<f64> = true_range(bars).into_iter().map(|v| v.unwrap_or(0.0)).collect();
    let seed = tr[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = Some(seed);

    let p = period as f64;
    let mut prev = seed;
    for i in (period + 1)..n {
        let next = (prev * (p - 1.0) + tr[i]) / p;
        result[i] = Some(next);
        prev = next;
    }

    result
}
