//! Typed predictions and their flat tool-schema form.
//!
//! A prediction kind flattens into one or more scalar properties of the
//! annotation tool. Property keys are `{name}_detected` / `{name}_rationale`
//! for binary, `{name}_text` for text and `{name}` / `{name}_rationale` for
//! classification. These keys are the wire contract with the model and with
//! [`PredictionType::from_tool_args`], so they never change.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const DETECTED_SUFFIX: &str = "_detected";
pub const RATIONALE_SUFFIX: &str = "_rationale";
pub const TEXT_SUFFIX: &str = "_text";

// =============================================================================
// PREDICTION TYPES
// =============================================================================

/// Whether a binary feature asks the model for a rationale.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RationalePolicy {
    /// Use the rubric-wide default.
    #[default]
    Inherit,
    Required,
    Optional,
}

impl RationalePolicy {
    /// Resolve `Inherit` against a rubric default; explicit policies win.
    pub fn resolve(self, rubric_requires: bool) -> Self {
        match self {
            RationalePolicy::Inherit if rubric_requires => RationalePolicy::Required,
            RationalePolicy::Inherit => RationalePolicy::Optional,
            explicit => explicit,
        }
    }

    /// An unresolved policy counts as required.
    pub fn is_required(self) -> bool {
        !matches!(self, RationalePolicy::Optional)
    }
}

/// Declared shape of a feature's prediction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PredictionType {
    Binary {
        #[serde(default)]
        rationale: RationalePolicy,
    },
    Text,
    Classification { labels: Vec<String> },
}

impl PredictionType {
    pub fn binary() -> Self {
        PredictionType::Binary {
            rationale: RationalePolicy::Inherit,
        }
    }

    pub fn binary_with(rationale: RationalePolicy) -> Self {
        PredictionType::Binary { rationale }
    }

    pub fn text() -> Self {
        PredictionType::Text
    }

    pub fn classification<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PredictionType::Classification {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PredictionType::Binary { .. } => "binary",
            PredictionType::Text => "text",
            PredictionType::Classification { .. } => "classification",
        }
    }

    /// Flattened property keys in emission order.
    pub fn keys(&self, field_name: &str) -> Vec<String> {
        match self {
            PredictionType::Binary { .. } => vec![
                format!("{field_name}{DETECTED_SUFFIX}"),
                format!("{field_name}{RATIONALE_SUFFIX}"),
            ],
            PredictionType::Text => vec![format!("{field_name}{TEXT_SUFFIX}")],
            PredictionType::Classification { .. } => vec![
                field_name.to_string(),
                format!("{field_name}{RATIONALE_SUFFIX}"),
            ],
        }
    }

    /// Flattened tool properties and the keys among them that are required.
    pub fn to_tool_properties(
        &self,
        field_name: &str,
        field_description: &str,
        rationale_description: &str,
    ) -> ToolProperties {
        let mut props = ToolProperties::default();
        match self {
            PredictionType::Binary { rationale } => {
                props.push(
                    format!("{field_name}{DETECTED_SUFFIX}"),
                    json!({"type": "boolean", "description": field_description}),
                    true,
                );
                props.push(
                    format!("{field_name}{RATIONALE_SUFFIX}"),
                    json!({"type": "string", "description": rationale_description}),
                    rationale.is_required(),
                );
            }
            PredictionType::Text => {
                props.push(
                    format!("{field_name}{TEXT_SUFFIX}"),
                    json!({"type": "string", "description": field_description}),
                    true,
                );
            }
            PredictionType::Classification { labels } => {
                props.push(
                    field_name.to_string(),
                    json!({"type": "string", "description": field_description, "enum": labels}),
                    true,
                );
                props.push(
                    format!("{field_name}{RATIONALE_SUFFIX}"),
                    json!({"type": "string", "description": rationale_description}),
                    true,
                );
            }
        }
        props
    }

    /// Rebuild a prediction from the model's flat argument object.
    pub fn from_tool_args(
        &self,
        field_name: &str,
        args: &Map<String, Value>,
    ) -> Result<Prediction, FieldError> {
        match self {
            PredictionType::Binary { rationale } => {
                let key = format!("{field_name}{DETECTED_SUFFIX}");
                let detected = match lookup(field_name, args, &key)? {
                    Value::Bool(b) => *b,
                    _ => return Err(FieldError::wrong_type(field_name, &key, "boolean")),
                };
                let key = format!("{field_name}{RATIONALE_SUFFIX}");
                let rationale = if rationale.is_required() {
                    string_arg(field_name, args, &key)?
                } else {
                    optional_string_arg(field_name, args, &key)?
                };
                Ok(Prediction::Binary {
                    detected,
                    rationale,
                })
            }
            PredictionType::Text => {
                let key = format!("{field_name}{TEXT_SUFFIX}");
                Ok(Prediction::Text {
                    text: string_arg(field_name, args, &key)?,
                })
            }
            PredictionType::Classification { labels } => {
                let label = string_arg(field_name, args, field_name)?;
                if !labels.iter().any(|l| *l == label) {
                    return Err(FieldError::InvalidLabel {
                        feature: field_name.to_string(),
                        label,
                        allowed: labels.clone(),
                    });
                }
                let key = format!("{field_name}{RATIONALE_SUFFIX}");
                Ok(Prediction::Classification {
                    label,
                    rationale: string_arg(field_name, args, &key)?,
                })
            }
        }
    }

    /// Whether a prediction has the shape this type declares.
    pub fn accepts(&self, prediction: &Prediction) -> bool {
        match (self, prediction) {
            (PredictionType::Binary { .. }, Prediction::Binary { .. }) => true,
            (PredictionType::Text, Prediction::Text { .. }) => true,
            (PredictionType::Classification { labels }, Prediction::Classification { label, .. }) => {
                labels.contains(label)
            }
            _ => false,
        }
    }
}

fn lookup<'a>(feature: &str, args: &'a Map<String, Value>, key: &str) -> Result<&'a Value, FieldError> {
    args.get(key).ok_or_else(|| FieldError::Missing {
        feature: feature.to_string(),
        key: key.to_string(),
    })
}

fn string_arg(feature: &str, args: &Map<String, Value>, key: &str) -> Result<String, FieldError> {
    match lookup(feature, args, key)? {
        Value::String(s) => Ok(s.clone()),
        _ => Err(FieldError::wrong_type(feature, key, "string")),
    }
}

fn optional_string_arg(feature: &str, args: &Map<String, Value>, key: &str) -> Result<String, FieldError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(FieldError::wrong_type(feature, key, "string")),
    }
}

// =============================================================================
// TOOL PROPERTIES
// =============================================================================

/// Flattened JSON-Schema properties for one or more features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolProperties {
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

impl ToolProperties {
    fn push(&mut self, key: String, schema: Value, required: bool) {
        if required {
            self.required.push(key.clone());
        }
        self.properties.insert(key, schema);
    }
}

// =============================================================================
// PREDICTION VALUES
// =============================================================================

/// A resolved prediction.
///
/// Serializes as `{"type": "binary", "detected", "rationale"}`,
/// `{"type": "text", "text"}` or `{"type": "classification", "label",
/// "rationale"}`; consolidated batch output stores exactly this form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Prediction {
    Binary { detected: bool, rationale: String },
    Text { text: String },
    Classification { label: String, rationale: String },
}

impl Prediction {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Prediction::Binary { .. } => "binary",
            Prediction::Text { .. } => "text",
            Prediction::Classification { .. } => "classification",
        }
    }

    pub fn rationale(&self) -> Option<&str> {
        match self {
            Prediction::Binary { rationale, .. } | Prediction::Classification { rationale, .. } => {
                Some(rationale)
            }
            Prediction::Text { .. } => None,
        }
    }

    /// The flat argument values a model would emit for this prediction.
    pub fn to_tool_args(&self, field_name: &str) -> Map<String, Value> {
        let mut args = Map::new();
        match self {
            Prediction::Binary {
                detected,
                rationale,
            } => {
                args.insert(format!("{field_name}{DETECTED_SUFFIX}"), Value::Bool(*detected));
                args.insert(
                    format!("{field_name}{RATIONALE_SUFFIX}"),
                    Value::String(rationale.clone()),
                );
            }
            Prediction::Text { text } => {
                args.insert(format!("{field_name}{TEXT_SUFFIX}"), Value::String(text.clone()));
            }
            Prediction::Classification { label, rationale } => {
                args.insert(field_name.to_string(), Value::String(label.clone()));
                args.insert(
                    format!("{field_name}{RATIONALE_SUFFIX}"),
                    Value::String(rationale.clone()),
                );
            }
        }
        args
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("feature '{feature}': missing field '{key}'")]
    Missing { feature: String, key: String },

    #[error("feature '{feature}': field '{key}' must be a {expected}")]
    WrongType {
        feature: String,
        key: String,
        expected: &'static str,
    },

    #[error("feature '{feature}': label '{label}' is not one of {allowed:?}")]
    InvalidLabel {
        feature: String,
        label: String,
        allowed: Vec<String>,
    },
}

impl FieldError {
    fn wrong_type(feature: &str, key: &str, expected: &'static str) -> Self {
        FieldError::WrongType {
            feature: feature.to_string(),
            key: key.to_string(),
            expected,
        }
    }

    pub fn feature(&self) -> &str {
        match self {
            FieldError::Missing { feature, .. }
            | FieldError::WrongType { feature, .. }
            | FieldError::InvalidLabel { feature, .. } => feature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn binary_flattens_to_detected_and_rationale() {
        let props = PredictionType::binary().to_tool_properties("has_tests", "Tests exist.", "Why.");
        let keys: Vec<_> = props.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["has_tests_detected", "has_tests_rationale"]);
        assert_eq!(props.required, keys);
        assert_eq!(props.properties["has_tests_detected"]["type"], "boolean");
        assert_eq!(props.properties["has_tests_detected"]["description"], "Tests exist.");
        assert_eq!(props.properties["has_tests_rationale"]["description"], "Why.");
    }

    #[test]
    fn optional_rationale_is_emitted_but_not_required() {
        let ty = PredictionType::binary_with(RationalePolicy::Optional);
        let props = ty.to_tool_properties("flag", "d", "r");
        assert!(props.properties.contains_key("flag_rationale"));
        assert_eq!(props.required, vec!["flag_detected"]);

        let parsed = ty
            .from_tool_args("flag", &args(json!({"flag_detected": false})))
            .unwrap();
        assert_eq!(
            parsed,
            Prediction::Binary {
                detected: false,
                rationale: String::new()
            }
        );
    }

    #[test]
    fn classification_label_key_has_no_suffix() {
        let ty = PredictionType::classification(["pass", "fail"]);
        let props = ty.to_tool_properties("outcome", "Result.", "Why.");
        assert_eq!(props.required, vec!["outcome", "outcome_rationale"]);
        assert_eq!(props.properties["outcome"]["enum"], json!(["pass", "fail"]));
    }

    #[test]
    fn text_flattens_to_single_key() {
        let props = PredictionType::text().to_tool_properties("summary", "Summarize.", "unused");
        assert_eq!(props.required, vec!["summary_text"]);
        assert_eq!(props.properties.len(), 1);
    }

    #[test]
    fn out_of_domain_label_is_rejected() {
        let ty = PredictionType::classification(["pass", "fail"]);
        let err = ty
            .from_tool_args(
                "outcome",
                &args(json!({"outcome": "maybe", "outcome_rationale": "unsure"})),
            )
            .unwrap_err();
        assert!(matches!(err, FieldError::InvalidLabel { ref label, .. } if label == "maybe"));
        assert_eq!(err.feature(), "outcome");
    }

    #[test]
    fn missing_key_names_feature_and_key() {
        let err = PredictionType::binary()
            .from_tool_args("has_tests", &args(json!({"has_tests_detected": true})))
            .unwrap_err();
        assert_eq!(
            err,
            FieldError::Missing {
                feature: "has_tests".to_string(),
                key: "has_tests_rationale".to_string(),
            }
        );
    }

    #[test]
    fn wrong_scalar_type_is_rejected() {
        let err = PredictionType::binary()
            .from_tool_args(
                "x",
                &args(json!({"x_detected": "true", "x_rationale": "because"})),
            )
            .unwrap_err();
        assert!(matches!(err, FieldError::WrongType { expected: "boolean", .. }));
    }

    #[test]
    fn round_trip_through_tool_args() {
        let cases = [
            (
                PredictionType::binary(),
                Prediction::Binary {
                    detected: true,
                    rationale: "saw pytest files".to_string(),
                },
            ),
            (
                PredictionType::text(),
                Prediction::Text {
                    text: "multi\nline ✓".to_string(),
                },
            ),
            (
                PredictionType::classification(["a", "b"]),
                Prediction::Classification {
                    label: "b".to_string(),
                    rationale: String::new(),
                },
            ),
        ];
        for (ty, value) in cases {
            let parsed = ty.from_tool_args("f", &value.to_tool_args("f")).unwrap();
            assert_eq!(parsed, value);
            assert!(ty.accepts(&parsed));
        }
    }

    #[test]
    fn persisted_form_is_tagged_by_type() {
        let p = Prediction::Classification {
            label: "Positive".to_string(),
            rationale: "thanks".to_string(),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
            v,
            json!({"type": "classification", "label": "Positive", "rationale": "thanks"})
        );
        let back: Prediction = serde_json::from_value(v).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn inherit_resolves_against_rubric_default() {
        assert_eq!(RationalePolicy::Inherit.resolve(true), RationalePolicy::Required);
        assert_eq!(RationalePolicy::Inherit.resolve(false), RationalePolicy::Optional);
        assert_eq!(RationalePolicy::Required.resolve(false), RationalePolicy::Required);
        assert_eq!(RationalePolicy::Optional.resolve(true), RationalePolicy::Optional);
    }
}
