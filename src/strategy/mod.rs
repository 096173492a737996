//! Strategy - rule filter followed by the model gate
//!
//! - [`signal`] - pure pivot/candle confluence rules
//! - [`gate`] - classifier approval with confidence

pub mod gate;
pub mod signal;

pub use gate::{Decision, DecisionGate, FeatureSnapshot, GateOutput, SIGNAL_FEATURE};
pub use signal::{Signal, SignalFilter};
