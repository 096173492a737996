//! Durable state shared across loop iterations
//!
//! - [`ledger`] - open trades and the snapshot each was opened with
//! - [`corpus`] - labeled outcomes for retraining

pub mod corpus;
pub mod ledger;

use std::path::PathBuf;
use thiserror::Error;

pub use corpus::{TrainingCorpus, TARGET_COLUMN};
pub use ledger::OpenTradeLedger;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The ledger already tracks this order id
    #[error("order {0} is already in the ledger")]
    DuplicateOrder(u64),
}
