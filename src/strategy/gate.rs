//! Decision Gate - classifier approval of a filtered signal

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::signal::Signal;
use crate::features::{FeatureRecord, IndicatorPeriods};
use crate::model::{Classifier, ModelError, WIN_LABEL};

/// Schema name of the signal feature the gate appends to each record
pub const SIGNAL_FEATURE: &str = "signal";

/// Feature name -> value, exactly the model's input schema
pub type FeatureSnapshot = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    pub approved: bool,
    /// Highest class probability, in [0, 1]
    pub confidence: f64,
}

/// Gate output: the verdict plus the snapshot that produced it
#[derive(Debug, Clone)]
pub struct GateOutput {
    pub decision: Decision,
    pub snapshot: FeatureSnapshot,
}

pub struct DecisionGate<C> {
    model: C,
}

impl<C: Classifier> DecisionGate<C> {
    pub fn new(model: C) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &C {
        &self.model
    }

    /// Feature names the model needs that no record built with `periods`
    /// can supply
    pub fn missing_features(&self, periods: IndicatorPeriods) -> Vec<String> {
        self.model
            .feature_names()
            .iter()
            .filter(|name| name.as_str() != SIGNAL_FEATURE && periods.resolve(name).is_none())
            .cloned()
            .collect()
    }

    /// Project a record onto the model's ordered input vector
    pub fn feature_vector(&self, record: &FeatureRecord, signal: Signal) -> Result<Vec<f64>, ModelError> {
        self.model
            .feature_names()
            .iter()
            .map(|name| {
                if name == SIGNAL_FEATURE {
                    Ok(signal.value())
                } else {
                    record.feature(name).ok_or_else(|| ModelError::SchemaMismatch {
                        feature: name.clone(),
                    })
                }
            })
            .collect()
    }

    /// Ask the model whether to take `signal`.
    ///
    /// `Signal::None` is never approved and never reaches the model.
    pub fn decide(&self, record: &FeatureRecord, signal: Signal) -> Result<GateOutput, ModelError> {
        let vector = self.feature_vector(record, signal)?;
        let snapshot: FeatureSnapshot = self
            .model
            .feature_names()
            .iter()
            .cloned()
            .zip(vector.iter().copied())
            .collect();

        if signal == Signal::None {
            return Ok(GateOutput {
                decision: Decision {
                    signal,
                    approved: false,
                    confidence: 0.0,
                },
                snapshot,
            });
        }

        let label = self.model.predict(&vector)?;
        let proba = self.model.predict_proba(&vector)?;
        let confidence = proba.iter().copied().fold(0.0, f64::max).clamp(0.0, 1.0);

        debug!("Model label {} with probabilities {:?}", label, proba);

        Ok(GateOutput {
            decision: Decision {
                signal,
                approved: label == WIN_LABEL,
                confidence,
            },
            snapshot,
        })
    }
}
