//! Annotation over a `ChatGateway`.

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AnnotatorConfig;
use crate::consensus::MultiSampleResult;
use crate::converter::{ConversationInput, ConversionError};
use crate::feature::FeatureData;
use crate::gateway::{ChatGateway, ChatRequest, ProviderError};
use crate::rubric::{Rubric, ToolCallError};

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    ToolCall(#[from] ToolCallError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("all {attempted} samples failed; last error: {last}")]
    NoSuccessfulSamples {
        attempted: usize,
        last: Box<AnnotateError>,
    },

    #[error("sample count must be at least 1")]
    NoSamples,
}

/// Parsed features of one annotation call plus its token usage.
#[derive(Debug, Clone)]
pub struct AnnotationOutcome {
    pub features: Vec<FeatureData>,
    pub model: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

pub struct Annotator<G: ChatGateway> {
    gateway: G,
    config: AnnotatorConfig,
}

impl<G: ChatGateway> Annotator<G> {
    pub fn new(gateway: G) -> Self {
        Self::with_config(gateway, AnnotatorConfig::default())
    }

    pub fn with_config(gateway: G, config: AnnotatorConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub async fn annotate(&self, rubric: &Rubric, request: ChatRequest) -> Result<AnnotationOutcome, AnnotateError> {
        let response = self.gateway.chat(request).await?;
        let features = rubric.response_to_feature_data(&response)?;
        debug!(
            tool = rubric.tool_name(),
            features = features.len(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "annotation parsed"
        );
        Ok(AnnotationOutcome {
            features,
            model: response.model,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        })
    }

    pub async fn annotate_text(&self, rubric: &Rubric, content: &str) -> Result<AnnotationOutcome, AnnotateError> {
        let request = rubric.create_text_request(content, &self.config);
        self.annotate(rubric, request).await
    }

    /// `Ok(None)` when the conversation is not annotatable.
    pub async fn annotate_conversation(
        &self,
        rubric: &Rubric,
        input: &ConversationInput,
    ) -> Result<Option<AnnotationOutcome>, AnnotateError> {
        match rubric.create_annotation_request(input, &self.config)? {
            Some(request) => Ok(Some(self.annotate(rubric, request).await?)),
            None => Ok(None),
        }
    }

    /// Run `samples` sequential annotations at `temperature`.
    ///
    /// Failed samples are logged and skipped; only a run with no successful
    /// sample is an error.
    pub async fn annotate_with_samples(
        &self,
        rubric: &Rubric,
        request: ChatRequest,
        samples: usize,
        temperature: f32,
    ) -> Result<MultiSampleResult, AnnotateError> {
        if samples == 0 {
            return Err(AnnotateError::NoSamples);
        }

        let mut result = MultiSampleResult::default();
        let mut last_error = None;
        for index in 0..samples {
            let req = request.clone().temperature(temperature);
            match self.annotate(rubric, req).await {
                Ok(outcome) => {
                    result.input_tokens += u64::from(outcome.input_tokens);
                    result.output_tokens += u64::from(outcome.output_tokens);
                    result.samples.push(outcome.features);
                }
                Err(err) => {
                    warn!(sample = index + 1, error = %err, "annotation sample failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(last) if result.samples.is_empty() => Err(AnnotateError::NoSuccessfulSamples {
                attempted: samples,
                last: Box::new(last),
            }),
            _ => Ok(result),
        }
    }
}
