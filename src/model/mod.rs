//! Classifier collaborator
//!
//! The gate only needs an opaque classifier that knows its input schema and
//! can produce a class label and class probabilities. Training happens
//! elsewhere; this crate loads the published artifact and runs inference.

mod forest;

use std::path::PathBuf;
use thiserror::Error;

pub use forest::{ForestModel, Node, Tree};

/// Label the classifier uses for a winning trade
pub const WIN_LABEL: u8 = 1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid model artifact: {0}")]
    Invalid(String),

    #[error("model expects feature '{feature}' which the feature builder does not produce")]
    SchemaMismatch { feature: String },

    #[error("feature vector has {got} values, model expects {expected}")]
    Dimension { expected: usize, got: usize },
}

/// Binary classifier with a fixed, ordered input schema
pub trait Classifier {
    /// Feature names in the order `predict` expects them
    fn feature_names(&self) -> &[String];

    /// Predicted class label
    fn predict(&self, features: &[f64]) -> Result<u8, ModelError>;

    /// Probability per class, indexed by label
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, ModelError>;
}
