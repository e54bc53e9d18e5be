//! Batch request files and consolidation of batch outputs.
//!
//! Requests are written as JSONL shards (`batch_000000_inputs.jsonl`, ...)
//! with one `batch_000000.json` metadata file per shard. Uploading shards and
//! polling the provider happen elsewhere; once outputs are downloaded as
//! `batch_*_outputs.jsonl`, [`consolidate_dir`] parses them with a rubric.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::{ChatRequest, CompletionBody, CompletionUsage};
use crate::feature::FeatureData;
use crate::prediction::Prediction;
use crate::rubric::Rubric;

pub const DEFAULT_ENDPOINT: &str = "/v1/chat/completions";
pub const DEFAULT_MAX_REQUESTS: usize = 50_000;
pub const DEFAULT_MAX_BYTES: usize = 200 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid batch metadata {path}: {source}")]
    InvalidInfo {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no requests to write")]
    Empty,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BatchError + '_ {
    move |source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// =============================================================================
// BATCH METADATA
// =============================================================================

/// Metadata of one input shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInfo {
    /// Provider batch id, filled in once the shard is submitted.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Provider file id of the uploaded shard.
    #[serde(default)]
    pub input_file_id: Option<String>,
    pub input_file: String,
    pub request_count: usize,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub endpoint: String,
    #[serde(default)]
    pub rubric_fingerprint: Option<String>,
}

impl BatchInfo {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(io_err(path))?;
        serde_json::from_str(&raw).map_err(|source| BatchError::InvalidInfo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BatchError> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(io_err(path))
    }
}

fn shard_info_name(index: usize) -> String {
    format!("batch_{index:06}.json")
}

fn shard_input_name(index: usize) -> String {
    format!("batch_{index:06}_inputs.jsonl")
}

fn is_shard_info_name(name: &str) -> bool {
    name.strip_prefix("batch_")
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn is_output_name(name: &str) -> bool {
    name.starts_with("batch_") && name.ends_with("_outputs.jsonl")
}

fn sorted_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if path.is_file() && path.file_name().and_then(|n| n.to_str()).is_some_and(&keep) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// All shard metadata files in `dir`, in shard order.
pub fn load_batch_infos(dir: impl AsRef<Path>) -> Result<Vec<BatchInfo>, BatchError> {
    sorted_files(dir.as_ref(), is_shard_info_name)?
        .iter()
        .map(BatchInfo::load)
        .collect()
}

// =============================================================================
// WRITER
// =============================================================================

#[derive(Serialize)]
struct RequestLine<'a> {
    custom_id: &'a str,
    method: &'static str,
    url: &'a str,
    body: &'a ChatRequest,
}

/// Writes chat requests into size-capped JSONL shards.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    dir: PathBuf,
    endpoint: String,
    max_requests: usize,
    max_bytes: usize,
    model: Option<String>,
    rubric_fingerprint: Option<String>,
}

struct Shard {
    index: usize,
    writer: BufWriter<File>,
    path: PathBuf,
    requests: usize,
    bytes: usize,
}

impl BatchWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_requests: DEFAULT_MAX_REQUESTS,
            max_bytes: DEFAULT_MAX_BYTES,
            model: None,
            rubric_fingerprint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_limits(mut self, max_requests: usize, max_bytes: usize) -> Self {
        self.max_requests = max_requests.max(1);
        self.max_bytes = max_bytes;
        self
    }

    /// Override the model of every request written.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Record the rubric fingerprint in shard metadata.
    pub fn with_rubric(mut self, rubric: &Rubric) -> Self {
        self.rubric_fingerprint = Some(rubric.fingerprint());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write requests with ids `req_{dir_name}_{index:08}`.
    pub fn write_requests(&self, requests: impl IntoIterator<Item = ChatRequest>) -> Result<Vec<BatchInfo>, BatchError> {
        let dir_name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch".to_string());
        self.write_keyed_requests(
            requests
                .into_iter()
                .enumerate()
                .map(|(i, req)| (format!("req_{dir_name}_{i:08}"), req)),
        )
    }

    /// Write requests under caller-chosen custom ids.
    pub fn write_keyed_requests(
        &self,
        requests: impl IntoIterator<Item = (String, ChatRequest)>,
    ) -> Result<Vec<BatchInfo>, BatchError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let mut infos = Vec::new();
        let mut shard: Option<Shard> = None;
        for (custom_id, mut request) in requests {
            if let Some(model) = &self.model {
                request.model = model.clone();
            }
            let line = serde_json::to_string(&RequestLine {
                custom_id: &custom_id,
                method: "POST",
                url: &self.endpoint,
                body: &request,
            })?;
            let line_size = line.len();

            let full = shard
                .as_ref()
                .is_some_and(|s| s.requests >= self.max_requests || s.bytes + line_size > self.max_bytes);
            if full {
                if let Some(done) = shard.take() {
                    infos.push(self.finish_shard(done)?);
                }
            }

            if shard.is_none() {
                shard = Some(self.open_shard(infos.len())?);
            }
            if let Some(current) = shard.as_mut() {
                writeln!(current.writer, "{line}").map_err(io_err(&current.path))?;
                current.requests += 1;
                current.bytes += line_size;
            }
        }

        if let Some(done) = shard.take() {
            infos.push(self.finish_shard(done)?);
        }
        if infos.is_empty() {
            return Err(BatchError::Empty);
        }
        info!(
            dir = %self.dir.display(),
            shards = infos.len(),
            requests = infos.iter().map(|i| i.request_count).sum::<usize>(),
            "batch input written"
        );
        Ok(infos)
    }

    fn open_shard(&self, index: usize) -> Result<Shard, BatchError> {
        let path = self.dir.join(shard_input_name(index));
        let file = File::create(&path).map_err(io_err(&path))?;
        Ok(Shard {
            index,
            writer: BufWriter::new(file),
            path,
            requests: 0,
            bytes: 0,
        })
    }

    fn finish_shard(&self, mut shard: Shard) -> Result<BatchInfo, BatchError> {
        shard.writer.flush().map_err(io_err(&shard.path))?;
        let info = BatchInfo {
            batch_id: None,
            input_file_id: None,
            input_file: shard_input_name(shard.index),
            request_count: shard.requests,
            byte_size: shard.bytes as u64,
            created_at: Utc::now(),
            endpoint: self.endpoint.clone(),
            rubric_fingerprint: self.rubric_fingerprint.clone(),
        };
        info.save(self.dir.join(shard_info_name(shard.index)))?;
        debug!(shard = shard.index, requests = shard.requests, bytes = shard.bytes, "batch shard closed");
        Ok(info)
    }
}

// =============================================================================
// CONSOLIDATION
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct OutputLine {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    response: Option<OutputResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputResponse {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    body: Option<CompletionBody>,
}

/// One successfully parsed batch output.
///
/// `features` maps feature name to the persisted `Prediction` form, in the
/// rubric's declaration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatedRecord {
    pub batch_id: String,
    pub custom_id: String,
    pub model: String,
    #[serde(default)]
    pub usage: CompletionUsage,
    pub features: Map<String, Value>,
    pub feature_count: usize,
}

impl ConsolidatedRecord {
    pub fn prediction(&self, name: &str) -> Option<Prediction> {
        self.features
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ConsolidationSummary {
    pub files: usize,
    pub lines: usize,
    pub records: usize,
    pub skipped_unparsable: usize,
    pub skipped_status: usize,
    pub skipped_no_choices: usize,
    pub skipped_no_tool_calls: usize,
    pub conversion_failures: usize,
    pub total_features: usize,
    /// Prediction kind → count across all records.
    pub feature_types: BTreeMap<String, usize>,
    /// Input shards written with a different rubric.
    pub fingerprint_mismatches: Vec<String>,
}

impl ConsolidationSummary {
    pub fn average_features(&self) -> f64 {
        if self.records == 0 {
            return 0.0;
        }
        self.total_features as f64 / self.records as f64
    }
}

#[derive(Debug, Clone, Default)]
pub struct Consolidation {
    pub records: Vec<ConsolidatedRecord>,
    pub summary: ConsolidationSummary,
}

/// Parse every `batch_*_outputs.jsonl` in `dir` with `rubric`.
///
/// Bad lines and unparsable responses are logged, counted in the summary and
/// skipped; only I/O failures are errors.
pub fn consolidate_dir(dir: impl AsRef<Path>, rubric: &Rubric) -> Result<Consolidation, BatchError> {
    let dir = dir.as_ref();
    let mut out = Consolidation::default();
    out.summary.fingerprint_mismatches = check_fingerprints(dir, rubric);

    let files = sorted_files(dir, is_output_name)?;
    if files.is_empty() {
        warn!(dir = %dir.display(), "no batch_*_outputs.jsonl files found");
    }

    for path in &files {
        out.summary.files += 1;
        let file = File::open(path).map_err(io_err(path))?;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(path))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            out.summary.lines += 1;
            if let Some(record) = consolidate_line(line, line_no + 1, path, rubric, &mut out.summary) {
                out.summary.records += 1;
                out.summary.total_features += record.feature_count;
                for kind in record.features.values().filter_map(|v| v.get("type").and_then(Value::as_str)) {
                    *out.summary.feature_types.entry(kind.to_string()).or_default() += 1;
                }
                out.records.push(record);
            }
        }
    }

    info!(
        files = out.summary.files,
        records = out.summary.records,
        conversion_failures = out.summary.conversion_failures,
        "batch outputs consolidated"
    );
    Ok(out)
}

fn consolidate_line(
    line: &str,
    line_no: usize,
    path: &Path,
    rubric: &Rubric,
    summary: &mut ConsolidationSummary,
) -> Option<ConsolidatedRecord> {
    let output: OutputLine = match serde_json::from_str(line) {
        Ok(output) => output,
        Err(err) => {
            warn!(file = %path.display(), line = line_no, error = %err, "skipping unparsable output line");
            summary.skipped_unparsable += 1;
            return None;
        }
    };
    let custom_id = output.custom_id.unwrap_or_else(|| "unknown".to_string());
    let response = output.response.unwrap_or_default();

    if response.status_code != Some(200) {
        warn!(custom_id = %custom_id, status = ?response.status_code, "skipping non-200 output");
        summary.skipped_status += 1;
        return None;
    }
    let body = response.body.unwrap_or_default();
    if body.choices.is_empty() {
        warn!(custom_id = %custom_id, "skipping output without choices");
        summary.skipped_no_choices += 1;
        return None;
    }

    let usage = body.usage.clone().unwrap_or_default();
    let model = body.model.clone().unwrap_or_else(|| "unknown".to_string());
    let response = body.into_response(Duration::ZERO);
    if response.tool_calls.is_empty() {
        warn!(custom_id = %custom_id, "skipping output without tool calls");
        summary.skipped_no_tool_calls += 1;
        return None;
    }

    let features = rubric
        .response_to_feature_data(&response)
        .map_err(|e| e.to_string())
        .and_then(|data| persisted_features(data).map_err(|e| e.to_string()));

    match features {
        Ok(features) => Some(ConsolidatedRecord {
            batch_id: output.id.unwrap_or_else(|| "unknown".to_string()),
            custom_id,
            model,
            usage,
            feature_count: features.len(),
            features,
        }),
        Err(err) => {
            warn!(custom_id = %custom_id, error = %err, "failed to convert output to feature data");
            summary.conversion_failures += 1;
            None
        }
    }
}

/// Persisted predictions keyed by feature name, keeping declaration order.
fn persisted_features(data: Vec<FeatureData>) -> Result<Map<String, Value>, serde_json::Error> {
    let mut features = Map::new();
    for d in data {
        let value = serde_json::to_value(&d.prediction)?;
        features.insert(d.feature.name, value);
    }
    Ok(features)
}

/// Input files whose recorded fingerprint differs from `rubric`'s.
fn check_fingerprints(dir: &Path, rubric: &Rubric) -> Vec<String> {
    let expected = rubric.fingerprint();
    let infos = match load_batch_infos(dir) {
        Ok(infos) => infos,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "could not read batch metadata");
            return Vec::new();
        }
    };

    let mut drifted = Vec::new();
    for info in infos {
        if let Some(found) = info.rubric_fingerprint.as_deref() {
            if found != expected {
                warn!(
                    input_file = %info.input_file,
                    found,
                    expected = %expected,
                    "batch was written with a different rubric"
                );
                drifted.push(info.input_file);
            }
        }
    }
    drifted
}

/// Write consolidated records as JSONL.
pub fn write_consolidated(records: &[ConsolidatedRecord], path: impl AsRef<Path>) -> Result<(), BatchError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(writer, "{line}").map_err(io_err(path))?;
    }
    writer.flush().map_err(io_err(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_file_names() {
        assert_eq!(shard_info_name(3), "batch_000003.json");
        assert_eq!(shard_input_name(12), "batch_000012_inputs.jsonl");
        assert!(is_shard_info_name("batch_000001.json"));
        assert!(!is_shard_info_name("batch_000001_outputs.jsonl"));
        assert!(!is_shard_info_name("batch_.json"));
        assert!(is_output_name("batch_000001_outputs.jsonl"));
        assert!(!is_output_name("batch_000001_inputs.jsonl"));
    }

    #[test]
    fn average_features_handles_empty() {
        let mut summary = ConsolidationSummary::default();
        assert_eq!(summary.average_features(), 0.0);
        summary.records = 2;
        summary.total_features = 5;
        assert_eq!(summary.average_features(), 2.5);
    }
}
