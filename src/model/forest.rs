//! Decision-forest artifact.
//!
//! JSON layout:
//!
//! ```json
//! {
//!   "feature_names": ["open", "high", ...],
//!   "trees": [
//!     { "nodes": [
//!         { "feature": 3, "threshold": 2010.5, "left": 1, "right": 2 },
//!         { "value": [0.8, 0.2] },
//!         { "value": [0.3, 0.7] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! A split sends `x[feature] <= threshold` left. Children always come after
//! their parent, which keeps traversal finite.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::{Classifier, ModelError};

const N_CLASSES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn leaf_distribution(&self, x: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => return value,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    feature_names: Vec<String>,
    trees: Vec<Tree>,
}

impl ForestModel {
    /// Build and validate a model
    pub fn new(feature_names: Vec<String>, trees: Vec<Tree>) -> Result<Self, ModelError> {
        let model = Self {
            feature_names,
            trees,
        };
        model.validate()?;
        Ok(model)
    }

    /// Load the artifact from a JSON file
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json(&text)?;
        info!(
            "Loaded model from {} ({} trees, {} features)",
            path.display(),
            model.trees.len(),
            model.feature_names.len()
        );
        Ok(model)
    }

    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(text)?;
        model.validate()?;
        Ok(model)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.feature_names.is_empty() {
            return Err(ModelError::Invalid("no feature names".to_string()));
        }
        if self.trees.is_empty() {
            return Err(ModelError::Invalid("no trees".to_string()));
        }

        let n_features = self.feature_names.len();
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ModelError::Invalid(format!("tree {t} has no nodes")));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Split {
                        feature,
                        left,
                        right,
                        ..
                    } => {
                        if *feature >= n_features {
                            return Err(ModelError::Invalid(format!(
                                "tree {t} node {i} splits on feature {feature} of {n_features}"
                            )));
                        }
                        for child in [*left, *right] {
                            if child <= i || child >= tree.nodes.len() {
                                return Err(ModelError::Invalid(format!(
                                    "tree {t} node {i} has bad child index {child}"
                                )));
                            }
                        }
                    }
                    Node::Leaf { value } => {
                        if value.len() != N_CLASSES || value.iter().any(|p| *p < 0.0) {
                            return Err(ModelError::Invalid(format!(
                                "tree {t} leaf {i} must hold {N_CLASSES} non-negative weights"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn check_dimension(&self, features: &[f64]) -> Result<(), ModelError> {
        if features.len() != self.feature_names.len() {
            return Err(ModelError::Dimension {
                expected: self.feature_names.len(),
                got: features.len(),
            });
        }
        Ok(())
    }
}

impl Classifier for ForestModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &[f64]) -> Result<u8, ModelError> {
        let proba = self.predict_proba(features)?;
        // ties go to the losing class
        Ok(if proba[1] > proba[0] { 1 } else { 0 })
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, ModelError> {
        self.check_dimension(features)?;

        let mut totals = [0.0; N_CLASSES];
        for tree in &self.trees {
            let leaf = tree.leaf_distribution(features);
            let sum: f64 = leaf.iter().sum();
            if sum > 0.0 {
                for (total, w) in totals.iter_mut().zip(leaf) {
                    *total += w / sum;
                }
            }
        }

        let grand: f64 = totals.iter().sum();
        if grand <= 0.0 {
            return Ok(vec![1.0 / N_CLASSES as f64; N_CLASSES]);
        }
        Ok(totals.iter().map(|t| t / grand).collect())
    }
}
