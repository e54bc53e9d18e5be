//! Rubric compiler: features in, one forced tool definition out, and back.
//!
//! A [`Rubric`] is an immutable, validated list of features plus the tool
//! name/description the model is forced to call. The tool schema is derived
//! on demand; parsing a tool call back is all-or-nothing.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::AnnotatorConfig;
use crate::converter::{transform_for_annotator, ConversationInput, ConversionError};
use crate::feature::{Feature, FeatureData};
use crate::gateway::{
    Attribution, ChatRequest, ChatResponse, Message, ToolCall, ToolChoice, ToolDefinition,
};
use crate::prediction::{FieldError, PredictionType, ToolProperties};

pub const DEFAULT_RATIONALE_DESCRIPTION: &str = "Brief evidence/quote (≤25 words) explaining why.";

// =============================================================================
// ERRORS
// =============================================================================

/// Problems in a rubric definition, raised by [`RubricBuilder::build`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("tool name must not be empty")]
    EmptyToolName,

    #[error("feature #{index} has an empty name")]
    EmptyFeatureName { index: usize },

    #[error("duplicate feature name '{name}'")]
    DuplicateFeature { name: String },

    #[error("classification feature '{feature}' has no labels")]
    EmptyLabels { feature: String },

    #[error("classification feature '{feature}' repeats label '{label}'")]
    DuplicateLabel { feature: String, label: String },

    #[error("property key '{key}' produced by both '{first}' and '{second}'")]
    KeyCollision {
        key: String,
        first: String,
        second: String,
    },
}

/// Failures turning a tool call back into feature data.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("rubric mismatch: expected tool '{expected}', got '{found}'")]
    RubricMismatch { expected: String, found: String },

    #[error("malformed arguments for tool '{tool}': {source}")]
    MalformedArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("arguments for tool '{tool}' are not a JSON object")]
    NotAnObject { tool: String },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("response has no tool call for '{tool}'")]
    NoToolCall { tool: String },
}

// =============================================================================
// RUBRIC
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    tool_name: String,
    tool_description: String,
    features: Vec<Feature>,
    system_message: Option<String>,
    user_message: Option<String>,
    rationale_description: String,
}

impl Rubric {
    pub fn builder(tool_name: impl Into<String>, tool_description: impl Into<String>) -> RubricBuilder {
        RubricBuilder::new(tool_name, tool_description)
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_description(&self) -> &str {
        &self.tool_description
    }

    /// Features in declaration order, with rationale policies resolved.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    pub fn user_message(&self) -> Option<&str> {
        self.user_message.as_deref()
    }

    pub fn rationale_description(&self) -> &str {
        &self.rationale_description
    }

    /// Merged properties and required keys of every feature, in order.
    pub fn tool_properties(&self) -> ToolProperties {
        let mut merged = ToolProperties::default();
        for feature in &self.features {
            let props = feature.prediction_type.to_tool_properties(
                &feature.name,
                &feature.description,
                &self.rationale_description,
            );
            merged.properties.extend(props.properties);
            merged.required.extend(props.required);
        }
        merged
    }

    /// JSON-Schema object for the tool's arguments.
    pub fn parameters(&self) -> Value {
        let props = self.tool_properties();
        json!({
            "type": "object",
            "properties": props.properties,
            "required": props.required,
        })
    }

    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.tool_name, &self.tool_description, self.parameters())
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        vec![self.tool_definition()]
    }

    /// Directive forcing the model to call exactly this rubric's tool.
    pub fn tool_choice(&self) -> ToolChoice {
        ToolChoice::function(&self.tool_name)
    }

    /// Hex blake3 digest of the compiled tool definition.
    ///
    /// Changes whenever anything the model sees in the schema changes.
    pub fn fingerprint(&self) -> String {
        let parameters = self.parameters().to_string();
        hash_fields(&[&self.tool_name, &self.tool_description, &parameters])
    }

    pub fn tool_call_match_rubrics(&self, tool_call: &ToolCall) -> bool {
        tool_call.function.name == self.tool_name
    }

    pub fn tool_call_to_feature_data(&self, tool_call: &ToolCall) -> Result<Vec<FeatureData>, ToolCallError> {
        if !self.tool_call_match_rubrics(tool_call) {
            return Err(ToolCallError::RubricMismatch {
                expected: self.tool_name.clone(),
                found: tool_call.function.name.clone(),
            });
        }
        let value: Value = serde_json::from_str(&tool_call.function.arguments).map_err(|source| {
            ToolCallError::MalformedArguments {
                tool: self.tool_name.clone(),
                source,
            }
        })?;
        match value {
            Value::Object(args) => self.feature_data_from_args(&args),
            _ => Err(ToolCallError::NotAnObject {
                tool: self.tool_name.clone(),
            }),
        }
    }

    /// One `FeatureData` per feature, or the first field error.
    pub fn feature_data_from_args(&self, args: &Map<String, Value>) -> Result<Vec<FeatureData>, ToolCallError> {
        self.features
            .iter()
            .map(|feature| -> Result<FeatureData, ToolCallError> {
                let prediction = feature.prediction_type.from_tool_args(&feature.name, args)?;
                Ok(FeatureData::new(feature.clone(), prediction))
            })
            .collect()
    }

    /// Parse the first tool call in `response` that targets this rubric.
    pub fn response_to_feature_data(&self, response: &ChatResponse) -> Result<Vec<FeatureData>, ToolCallError> {
        if let Some(call) = response
            .tool_calls
            .iter()
            .find(|c| self.tool_call_match_rubrics(c))
        {
            return self.tool_call_to_feature_data(call);
        }
        match response.tool_calls.first() {
            Some(other) => Err(ToolCallError::RubricMismatch {
                expected: self.tool_name.clone(),
                found: other.function.name.clone(),
            }),
            None => Err(ToolCallError::NoToolCall {
                tool: self.tool_name.clone(),
            }),
        }
    }

    /// Request annotating a piece of plain text.
    pub fn create_text_request(&self, content: &str, config: &AnnotatorConfig) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_message {
            messages.push(Message::system(system.clone()));
        }
        let user = match &self.user_message {
            Some(instruction) => format!("{instruction}\n\n{content}"),
            None => content.to_string(),
        };
        messages.push(Message::user(user));
        self.request(messages, config, "rubric::create_text_request")
    }

    /// Request annotating a recorded agent conversation.
    ///
    /// `Ok(None)` when the conversation is not annotatable (no system, user
    /// or assistant message).
    pub fn create_annotation_request(
        &self,
        input: &ConversationInput,
        config: &AnnotatorConfig,
    ) -> Result<Option<ChatRequest>, ConversionError> {
        let system = self
            .system_message
            .as_deref()
            .ok_or_else(|| ConversionError::missing_rubric_message(&self.tool_name, "system message"))?;
        let instruction = self
            .user_message
            .as_deref()
            .ok_or_else(|| ConversionError::missing_rubric_message(&self.tool_name, "user message"))?;

        let Some(messages) = transform_for_annotator(input, system, instruction)? else {
            return Ok(None);
        };
        Ok(Some(self.request(messages, config, "rubric::create_annotation_request")))
    }

    fn request(&self, messages: Vec<Message>, config: &AnnotatorConfig, caller: &'static str) -> ChatRequest {
        let mut req = ChatRequest::new(config.model.clone(), messages, Attribution::new(caller))
            .temperature(config.temperature)
            .tools(self.tools(), self.tool_choice());
        if let Some(max) = config.max_tokens {
            req = req.max_tokens(max);
        }
        req
    }
}

// =============================================================================
// BUILDER
// =============================================================================

#[derive(Debug, Clone)]
pub struct RubricBuilder {
    tool_name: String,
    tool_description: String,
    features: Vec<Feature>,
    system_message: Option<String>,
    user_message: Option<String>,
    rationale_description: String,
    require_rationale: bool,
}

impl RubricBuilder {
    pub fn new(tool_name: impl Into<String>, tool_description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_description: tool_description.into(),
            features: Vec::new(),
            system_message: None,
            user_message: None,
            rationale_description: DEFAULT_RATIONALE_DESCRIPTION.to_string(),
            require_rationale: true,
        }
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn rationale_description(mut self, description: impl Into<String>) -> Self {
        self.rationale_description = description.into();
        self
    }

    /// Rubric-wide default for binary features left at `RationalePolicy::Inherit`.
    pub fn require_rationale(mut self, required: bool) -> Self {
        self.require_rationale = required;
        self
    }

    pub fn build(self) -> Result<Rubric, DefinitionError> {
        if self.tool_name.trim().is_empty() {
            return Err(DefinitionError::EmptyToolName);
        }

        let mut names: HashSet<&str> = HashSet::new();
        let mut owners: HashMap<String, &str> = HashMap::new();
        for (index, feature) in self.features.iter().enumerate() {
            if feature.name.trim().is_empty() {
                return Err(DefinitionError::EmptyFeatureName { index });
            }
            if !names.insert(&feature.name) {
                return Err(DefinitionError::DuplicateFeature {
                    name: feature.name.clone(),
                });
            }
            if let PredictionType::Classification { labels } = &feature.prediction_type {
                validate_labels(&feature.name, labels)?;
            }
            for key in feature.keys() {
                if let Some(first) = owners.get(&key) {
                    return Err(DefinitionError::KeyCollision {
                        key,
                        first: first.to_string(),
                        second: feature.name.clone(),
                    });
                }
                owners.insert(key, &feature.name);
            }
        }

        let require = self.require_rationale;
        let features = self
            .features
            .into_iter()
            .map(|mut feature| {
                if let PredictionType::Binary { rationale } = &mut feature.prediction_type {
                    *rationale = rationale.resolve(require);
                }
                feature
            })
            .collect();

        Ok(Rubric {
            tool_name: self.tool_name,
            tool_description: self.tool_description,
            features,
            system_message: self.system_message,
            user_message: self.user_message,
            rationale_description: self.rationale_description,
        })
    }
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn validate_labels(feature: &str, labels: &[String]) -> Result<(), DefinitionError> {
    if labels.is_empty() {
        return Err(DefinitionError::EmptyLabels {
            feature: feature.to_string(),
        });
    }
    let mut seen = HashSet::new();
    for label in labels {
        if label.is_empty() {
            return Err(DefinitionError::EmptyLabels {
                feature: feature.to_string(),
            });
        }
        if !seen.insert(label.as_str()) {
            return Err(DefinitionError::DuplicateLabel {
                feature: feature.to_string(),
                label: label.clone(),
            });
        }
    }
    Ok(())
}
