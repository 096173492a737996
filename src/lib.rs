//! Pivot-gate trading bot
//!
//! A rule-based pivot/candle signal filter, gated by a pre-trained classifier,
//! executing single market orders and feeding realized outcomes back into a
//! training corpus.
//!
//! ```text
//! broker bars -> features -> signal filter -> decision gate -> executor -> ledger
//!                          control loop -> reconciler -> corpus
//! ```

pub mod broker;
pub mod config;
pub mod control;
pub mod execution;
pub mod features;
pub mod gateway;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use broker::{Broker, BrokerError, BrokerSession, PaperBroker, PaperConfig};
pub use config::{BotConfig, ExecutionMode, StrategyConfig};
pub use control::{ControlLoop, LoopState, RunStats, TickOutcome, TickReport};
pub use features::{FeatureBuilder, FeatureRecord};
pub use gateway::GatewayClient;
pub use model::{Classifier, ForestModel, ModelError};
pub use reconcile::{OutcomeReconciler, ReconcileReport};
pub use store::{OpenTradeLedger, StoreError, TrainingCorpus};
pub use strategy::{Decision, DecisionGate, Signal, SignalFilter};
pub use types::{Bar, Direction, Quote};
