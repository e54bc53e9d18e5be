//! Features and the per-feature parse result.

use serde::{Deserialize, Serialize};

use crate::prediction::{Prediction, PredictionType, RationalePolicy};

/// One named question a rubric asks about the input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub prediction_type: PredictionType,
}

impl Feature {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prediction_type: PredictionType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prediction_type,
        }
    }

    pub fn binary(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, PredictionType::binary())
    }

    pub fn text(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, PredictionType::text())
    }

    pub fn classification<I, S>(name: impl Into<String>, description: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, description, PredictionType::classification(labels))
    }

    /// Override the rationale policy of a binary feature. No-op for other kinds.
    pub fn with_rationale(mut self, policy: RationalePolicy) -> Self {
        if let PredictionType::Binary { rationale } = &mut self.prediction_type {
            *rationale = policy;
        }
        self
    }

    /// Flattened property keys this feature contributes to the tool schema.
    pub fn keys(&self) -> Vec<String> {
        self.prediction_type.keys(&self.name)
    }
}

/// A feature paired with the prediction parsed for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureData {
    pub feature: Feature,
    pub prediction: Prediction,
}

impl FeatureData {
    pub fn new(feature: Feature, prediction: Prediction) -> Self {
        Self {
            feature,
            prediction,
        }
    }

    pub fn name(&self) -> &str {
        &self.feature.name
    }

    /// `Some(detected)` for binary predictions.
    pub fn detected(&self) -> Option<bool> {
        match &self.prediction {
            Prediction::Binary { detected, .. } => Some(*detected),
            _ => None,
        }
    }

    /// `Some(label)` for classification predictions.
    pub fn label(&self) -> Option<&str> {
        match &self.prediction {
            Prediction::Classification { label, .. } => Some(label),
            _ => None,
        }
    }
}
