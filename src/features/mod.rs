//! Feature Builder
//!
//! Turns a window of raw OHLCV bars into enriched per-bar records:
//! - [`indicators`] - EMA trend pair and Wilder ATR
//! - [`pivots`] - previous-day floor pivots, as-of joined onto bars
//! - [`patterns`] - engulfing and hammer candle scores
//! - [`record`] - the record type and its fixed feature schema
//! - [`builder`] - ties the above together

pub mod builder;
pub mod indicators;
pub mod patterns;
pub mod pivots;
pub mod record;

pub use builder::FeatureBuilder;
pub use pivots::PivotLevels;
pub use record::{FeatureRecord, IndicatorPeriods, Sessions, FEATURE_NAMES, VOLUME_ALIASES};
