//! Bar window -> feature records

use tracing::{debug, warn};

use super::indicators::{atr, ema};
use super::patterns::{engulfing, hammer};
use super::pivots::daily_pivots;
use super::record::{FeatureRecord, IndicatorPeriods};
use crate::config::StrategyConfig;
use crate::types::Bar;

/// Computes [`FeatureRecord`]s from an ordered window of closed bars
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: StrategyConfig,
}

impl FeatureBuilder {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn min_window(&self) -> usize {
        self.config.min_window()
    }

    /// Records for every bar whose indicators are fully defined.
    ///
    /// A window shorter than [`min_window`](Self::min_window), or one whose
    /// timestamps are not strictly increasing, yields no records.
    pub fn build(&self, bars: &[Bar]) -> Vec<FeatureRecord> {
        if bars.len() < self.min_window() {
            debug!(
                "Window of {} bars is shorter than the {} required",
                bars.len(),
                self.min_window()
            );
            return Vec::new();
        }

        if bars.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
            warn!("Bar window is not strictly increasing in time, skipping");
            return Vec::new();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let fast = ema(&closes, self.config.ema_fast);
        let slow = ema(&closes, self.config.ema_slow);
        let atr = atr(bars, self.config.atr_period);
        let pivots = daily_pivots(bars);
        let periods = IndicatorPeriods::from(&self.config);

        let mut records = Vec::new();
        for i in 1..bars.len() {
            let (Some(fast), Some(slow), Some(atr), Some(levels)) =
                (fast[i], slow[i], atr[i], pivots[i])
            else {
                continue;
            };

            let prev = &bars[i - 1];
            let cur = &bars[i];
            records.push(FeatureRecord::new(
                *cur,
                levels,
                fast,
                slow,
                atr,
                engulfing(prev, cur),
                hammer(prev, cur),
            )
            .with_periods(periods));
        }

        records
    }

    /// Record for the most recent bar, if it is fully defined
    pub fn latest(&self, bars: &[Bar]) -> Option<FeatureRecord> {
        let last = bars.last()?.timestamp;
        self.build(bars)
            .pop()
            .filter(|record| record.bar.timestamp == last)
    }
}
