#![forbid(unsafe_code)]

//! # critic-rubrics
//!
//! Typed rubrics for LLM annotation.
//!
//! A rubric is an ordered list of features, each asking one question with a
//! typed answer: a binary detection with rationale, free text, or a label from
//! a closed set. The rubric compiles into a single function tool that the
//! model is forced to call, and parses the resulting tool call back into one
//! typed prediction per feature. Parsing is strict: a missing field, a wrong
//! scalar type or an out-of-domain label rejects the whole response.
//!
//! Around that core sit request assembly for plain text and recorded agent
//! conversations, an async `ChatGateway` seam with retries, multi-sample
//! consensus, and JSONL batch input/output handling.

pub mod annotator;
pub mod batch;
pub mod config;
pub mod consensus;
pub mod converter;
pub mod feature;
pub mod gateway;
pub mod prediction;
pub mod rubric;
pub mod rubrics;

pub use annotator::{AnnotateError, AnnotationOutcome, Annotator};
pub use batch::{
    consolidate_dir, load_batch_infos, write_consolidated, BatchError, BatchInfo, BatchWriter,
    ConsolidatedRecord, Consolidation, ConsolidationSummary,
};
pub use config::{load_rubric_from_path, AnnotatorConfig, ConfigError, RubricConfig};
pub use consensus::MultiSampleResult;
pub use converter::{transform_for_annotator, ConversationInput, ConversionError, TraceMessage};
pub use feature::{Feature, FeatureData};
pub use gateway::{Attribution, ChatGateway, ChatRequest, ChatResponse, ProviderError, RetryingGateway, ToolCall, UsageSink};
pub use prediction::{FieldError, Prediction, PredictionType, RationalePolicy, ToolProperties};
pub use rubric::{DefinitionError, Rubric, RubricBuilder, ToolCallError};
