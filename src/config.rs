//! Rubric definition files and annotator settings.
//!
//! A rubric file is TOML or JSON:
//!
//! ```toml
//! tool_name = "annotate_issue"
//! tool_description = "Annotate an issue."
//! require_rationale = true
//!
//! [[features]]
//! name = "has_repro"
//! description = "The issue includes reproduction steps."
//! type = "binary"
//!
//! [[features]]
//! name = "severity"
//! description = "How severe the issue is."
//! type = "classification"
//! labels = ["low", "high"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feature::Feature;
use crate::prediction::{PredictionType, RationalePolicy};
use crate::rubric::{DefinitionError, Rubric};

pub const DEFAULT_MODEL: &str = "openai/o3-2025-04-16";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML rubric: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to render TOML rubric: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("failed to parse JSON rubric: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported rubric file extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("invalid feature '{feature}': {message}")]
    InvalidFeature { feature: String, message: String },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

// =============================================================================
// RUBRIC FILES
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Binary,
    Text,
    Classification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: FeatureKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "is_inherit")]
    pub rationale: RationalePolicy,
}

fn is_inherit(policy: &RationalePolicy) -> bool {
    *policy == RationalePolicy::Inherit
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RubricConfig {
    pub tool_name: String,
    pub tool_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_rationale: Option<bool>,
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
}

impl RubricConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn into_rubric(self) -> Result<Rubric, ConfigError> {
        let mut builder = Rubric::builder(self.tool_name, self.tool_description);
        if let Some(msg) = self.system_message {
            builder = builder.system_message(msg);
        }
        if let Some(msg) = self.user_message {
            builder = builder.user_message(msg);
        }
        if let Some(desc) = self.rationale_description {
            builder = builder.rationale_description(desc);
        }
        if let Some(required) = self.require_rationale {
            builder = builder.require_rationale(required);
        }
        for spec in self.features {
            builder = builder.feature(feature_from_spec(spec)?);
        }
        Ok(builder.build()?)
    }
}

impl From<&Rubric> for RubricConfig {
    fn from(rubric: &Rubric) -> Self {
        let features = rubric
            .features()
            .iter()
            .map(|f| {
                let (kind, labels, rationale) = match &f.prediction_type {
                    PredictionType::Binary { rationale } => (FeatureKind::Binary, Vec::new(), *rationale),
                    PredictionType::Text => (FeatureKind::Text, Vec::new(), RationalePolicy::Inherit),
                    PredictionType::Classification { labels } => {
                        (FeatureKind::Classification, labels.clone(), RationalePolicy::Inherit)
                    }
                };
                FeatureSpec {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    kind,
                    labels,
                    rationale,
                }
            })
            .collect();
        Self {
            tool_name: rubric.tool_name().to_string(),
            tool_description: rubric.tool_description().to_string(),
            system_message: rubric.system_message().map(str::to_string),
            user_message: rubric.user_message().map(str::to_string),
            rationale_description: Some(rubric.rationale_description().to_string()),
            require_rationale: None,
            features,
        }
    }
}

fn feature_from_spec(spec: FeatureSpec) -> Result<Feature, ConfigError> {
    validate_feature_spec(&spec)?;
    let prediction_type = match spec.kind {
        FeatureKind::Binary => PredictionType::binary_with(spec.rationale),
        FeatureKind::Text => PredictionType::text(),
        FeatureKind::Classification => PredictionType::classification(spec.labels),
    };
    Ok(Feature::new(spec.name, spec.description, prediction_type))
}

fn validate_feature_spec(spec: &FeatureSpec) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidFeature {
        feature: spec.name.clone(),
        message: message.to_string(),
    };
    if spec.description.trim().is_empty() {
        return Err(invalid("description must be non-empty"));
    }
    if spec.kind != FeatureKind::Classification && !spec.labels.is_empty() {
        return Err(invalid("labels are only allowed on classification features"));
    }
    if spec.kind != FeatureKind::Binary && spec.rationale != RationalePolicy::Inherit {
        return Err(invalid("rationale policy is only configurable on binary features"));
    }
    Ok(())
}

/// Load a rubric from a `.toml` or `.json` file.
pub fn load_rubric_from_path(path: impl AsRef<Path>) -> Result<Rubric, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => RubricConfig::from_toml_str(&raw)?,
        Some("json") => RubricConfig::from_json_str(&raw)?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };
    config.into_rubric()
}

// =============================================================================
// ANNOTATOR SETTINGS
// =============================================================================

/// Model settings applied to every annotation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotatorConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

impl AnnotatorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Defaults overridden by `CRITIC_RUBRICS_MODEL`, `CRITIC_RUBRICS_TEMPERATURE`
    /// and `CRITIC_RUBRICS_MAX_TOKENS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(model) = lookup("CRITIC_RUBRICS_MODEL") {
            let model = model.trim();
            if !model.is_empty() {
                config.model = model.to_string();
            }
        }
        if let Some(t) = lookup("CRITIC_RUBRICS_TEMPERATURE").and_then(|s| s.trim().parse::<f32>().ok()) {
            if (0.0..=2.0).contains(&t) {
                config.temperature = t;
            }
        }
        if let Some(max) = lookup("CRITIC_RUBRICS_MAX_TOKENS").and_then(|s| s.trim().parse::<u32>().ok()) {
            if max > 0 {
                config.max_tokens = Some(max);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUE_TOML: &str = r#"
tool_name = "annotate_issue"
tool_description = "Annotate an issue."
require_rationale = false

[[features]]
name = "has_repro"
description = "The issue includes reproduction steps."
type = "binary"

[[features]]
name = "has_logs"
description = "The issue includes logs."
type = "binary"
rationale = "required"

[[features]]
name = "severity"
description = "How severe the issue is."
type = "classification"
labels = ["low", "high"]
"#;

    #[test]
    fn toml_rubric_builds() {
        let rubric = RubricConfig::from_toml_str(ISSUE_TOML)
            .unwrap()
            .into_rubric()
            .unwrap();
        assert_eq!(rubric.tool_name(), "annotate_issue");
        assert_eq!(rubric.features().len(), 3);
        assert_eq!(
            rubric.tool_properties().required,
            vec!["has_repro_detected", "has_logs_detected", "has_logs_rationale", "severity", "severity_rationale"]
        );
    }

    #[test]
    fn labels_on_binary_feature_are_rejected() {
        let raw = r#"{
            "tool_name": "t",
            "tool_description": "d",
            "features": [{"name": "x", "description": "x", "type": "binary", "labels": ["a"]}]
        }"#;
        let err = RubricConfig::from_json_str(raw).unwrap().into_rubric().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFeature { ref feature, .. } if feature == "x"));
    }

    #[test]
    fn definition_errors_surface_through_config() {
        let raw = r#"{
            "tool_name": "t",
            "tool_description": "d",
            "features": [
                {"name": "x", "description": "a", "type": "text"},
                {"name": "x", "description": "b", "type": "text"}
            ]
        }"#;
        let err = RubricConfig::from_json_str(raw).unwrap().into_rubric().unwrap_err();
        assert!(matches!(err, ConfigError::Definition(DefinitionError::DuplicateFeature { .. })));
    }

    #[test]
    fn rubric_survives_toml_export() {
        let rubric = RubricConfig::from_toml_str(ISSUE_TOML)
            .unwrap()
            .into_rubric()
            .unwrap();
        let exported = RubricConfig::from(&rubric).to_toml_string().unwrap();
        let reloaded = RubricConfig::from_toml_str(&exported)
            .unwrap()
            .into_rubric()
            .unwrap();
        assert_eq!(reloaded, rubric);
        assert_eq!(reloaded.fingerprint(), rubric.fingerprint());
    }

    #[test]
    fn load_from_path_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("issue.toml");
        std::fs::write(&toml_path, ISSUE_TOML).unwrap();
        assert_eq!(load_rubric_from_path(&toml_path).unwrap().features().len(), 3);

        let yaml_path = dir.path().join("issue.yaml");
        std::fs::write(&yaml_path, "x: 1").unwrap();
        assert!(matches!(
            load_rubric_from_path(&yaml_path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn annotator_config_from_lookup() {
        let cfg = AnnotatorConfig::from_lookup(|key| match key {
            "CRITIC_RUBRICS_MODEL" => Some("anthropic/claude-sonnet".to_string()),
            "CRITIC_RUBRICS_TEMPERATURE" => Some("0.7".to_string()),
            "CRITIC_RUBRICS_MAX_TOKENS" => Some("4096".to_string()),
            _ => None,
        });
        assert_eq!(cfg.model, "anthropic/claude-sonnet");
        assert!((cfg.temperature - 0.7).abs() < 1e-6);
        assert_eq!(cfg.max_tokens, Some(4096));

        let defaults = AnnotatorConfig::from_lookup(|_| None);
        assert_eq!(defaults, AnnotatorConfig::default());
        assert_eq!(defaults.model, DEFAULT_MODEL);
    }
}
