//! Order execution
//!
//! Turns an approved signal into a broker market order with attached
//! stop-loss and take-profit.

mod executor;

pub use executor::{ExecutionError, OrderExecutor, RiskLevels};
