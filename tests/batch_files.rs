//! Batch input sharding and output consolidation on disk.

use std::fs;
use std::io::{BufRead, BufReader};

use critic_rubrics::batch::DEFAULT_ENDPOINT;
use critic_rubrics::rubrics::solvability_rubric;
use critic_rubrics::{
    consolidate_dir, load_batch_infos, write_consolidated, AnnotatorConfig, BatchError, BatchWriter,
    ConsolidatedRecord, Feature, Prediction, Rubric,
};
use serde_json::{json, Value};

fn grading_rubric() -> Rubric {
    Rubric::builder("grade_run", "Grade an agent run.")
        .system_message("You grade agent runs.")
        .feature(Feature::binary("looped", "The agent repeated itself."))
        .feature(Feature::text("summary", "One-line summary."))
        .build()
        .unwrap()
}

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    let file = fs::File::open(path).unwrap();
    BufReader::new(file)
        .lines()
        .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
        .collect()
}

fn output_line(custom_id: &str, status: u16, body: Value) -> String {
    json!({
        "id": "batch_req_1",
        "custom_id": custom_id,
        "response": {"status_code": status, "body": body}
    })
    .to_string()
}

fn tool_body(name: &str, args: Value) -> Value {
    json!({
        "model": "openai/o3-2025-04-16",
        "choices": [{
            "message": {"content": null, "tool_calls": [{
                "id": "call_1", "type": "function",
                "function": {"name": name, "arguments": args.to_string()}
            }]},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 1200, "completion_tokens": 80, "total_tokens": 1280}
    })
}

#[test]
fn writer_shards_by_request_count() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("run42");
    let rubric = grading_rubric();
    let config = AnnotatorConfig::default();
    let requests = (0..5).map(|i| rubric.create_text_request(&format!("transcript {i}"), &config));

    let infos = BatchWriter::new(&dir)
        .with_limits(2, usize::MAX)
        .with_model("openai/gpt-4.1")
        .with_rubric(&rubric)
        .write_requests(requests)
        .unwrap();

    let counts: Vec<usize> = infos.iter().map(|i| i.request_count).collect();
    assert_eq!(counts, vec![2, 2, 1]);
    assert_eq!(infos[2].input_file, "batch_000002_inputs.jsonl");
    assert_eq!(load_batch_infos(&dir).unwrap(), infos);

    let first = read_lines(&dir.join("batch_000000_inputs.jsonl"));
    assert_eq!(first.len(), 2);
    assert_eq!(first[0]["custom_id"], "req_run42_00000000");
    assert_eq!(first[1]["custom_id"], "req_run42_00000001");
    assert_eq!(first[0]["method"], "POST");
    assert_eq!(first[0]["url"], DEFAULT_ENDPOINT);
    assert_eq!(first[0]["body"]["model"], "openai/gpt-4.1");
    assert_eq!(first[0]["body"]["tool_choice"]["function"]["name"], "grade_run");
    assert!(first[0]["body"].get("attribution").is_none());

    let last = read_lines(&dir.join("batch_000002_inputs.jsonl"));
    assert_eq!(last[0]["custom_id"], "req_run42_00000004");
    assert_eq!(infos[0].rubric_fingerprint.as_deref(), Some(rubric.fingerprint().as_str()));
}

#[test]
fn writer_rolls_over_on_byte_limit() {
    let temp = tempfile::tempdir().unwrap();
    let rubric = grading_rubric();
    let config = AnnotatorConfig::default();
    let requests: Vec<_> = (0..3)
        .map(|i| (format!("item-{i}"), rubric.create_text_request("x", &config)))
        .collect();

    let infos = BatchWriter::new(temp.path())
        .with_limits(100, 1)
        .write_keyed_requests(requests)
        .unwrap();
    assert_eq!(infos.len(), 3);
    assert!(infos.iter().all(|i| i.request_count == 1));
}

#[test]
fn writer_rejects_empty_input() {
    let temp = tempfile::tempdir().unwrap();
    let err = BatchWriter::new(temp.path())
        .write_requests(Vec::new())
        .unwrap_err();
    assert!(matches!(err, BatchError::Empty));
}

#[test]
fn consolidation_counts_every_skip_reason() {
    let temp = tempfile::tempdir().unwrap();
    let rubric = grading_rubric();
    let good_args = json!({
        "looped_detected": true,
        "looped_rationale": "ran ls four times",
        "summary_text": "agent looped"
    });
    let lines = [
        output_line("a", 200, tool_body("grade_run", good_args.clone())),
        output_line("b", 500, json!({})),
        output_line("c", 200, json!({"choices": []})),
        output_line("d", 200, json!({"choices": [{"message": {"content": "no tools"}}]})),
        "{not json".to_string(),
        output_line("e", 200, tool_body("grade_run", json!({"looped_detected": "yes"}))),
        output_line("f", 200, tool_body("grade_run", good_args)),
    ];
    fs::write(temp.path().join("batch_000000_outputs.jsonl"), lines.join("\n")).unwrap();
    fs::write(temp.path().join("unrelated.jsonl"), "garbage\n").unwrap();

    let consolidation = consolidate_dir(temp.path(), &rubric).unwrap();
    let summary = &consolidation.summary;
    assert_eq!(summary.files, 1);
    assert_eq!(summary.lines, 7);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.skipped_status, 1);
    assert_eq!(summary.skipped_no_choices, 1);
    assert_eq!(summary.skipped_no_tool_calls, 1);
    assert_eq!(summary.skipped_unparsable, 1);
    assert_eq!(summary.conversion_failures, 1);
    assert_eq!(summary.total_features, 4);
    assert_eq!(summary.feature_types["binary"], 2);
    assert_eq!(summary.feature_types["text"], 2);
    assert_eq!(summary.average_features(), 2.0);

    let record = &consolidation.records[0];
    assert_eq!(record.custom_id, "a");
    assert_eq!(record.batch_id, "batch_req_1");
    assert_eq!(record.model, "openai/o3-2025-04-16");
    assert_eq!(record.usage.prompt_tokens, Some(1200));
    assert_eq!(
        record.prediction("looped"),
        Some(Prediction::Binary {
            detected: true,
            rationale: "ran ls four times".to_string()
        })
    );
    assert_eq!(record.features["summary"], json!({"type": "text", "text": "agent looped"}));
    assert!(summary.fingerprint_mismatches.is_empty());

    let out = temp.path().join("consolidated.jsonl");
    write_consolidated(&consolidation.records, &out).unwrap();
    let reread: Vec<ConsolidatedRecord> = fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(reread, consolidation.records);
}

#[test]
fn consolidation_with_other_rubric_counts_conversion_failures() {
    let temp = tempfile::tempdir().unwrap();
    let line = output_line(
        "a",
        200,
        tool_body(
            "grade_run",
            json!({"looped_detected": false, "looped_rationale": "", "summary_text": "fine"}),
        ),
    );
    fs::write(temp.path().join("batch_000000_outputs.jsonl"), line).unwrap();

    let consolidation = consolidate_dir(temp.path(), &solvability_rubric().unwrap()).unwrap();
    assert!(consolidation.records.is_empty());
    assert_eq!(consolidation.summary.conversion_failures, 1);
}

#[test]
fn consolidated_features_keep_rubric_order() {
    let temp = tempfile::tempdir().unwrap();
    let rubric = Rubric::builder("review", "Review a change.")
        .feature(Feature::text("verdict", "Final verdict."))
        .feature(Feature::binary("has_tests", "Tests were added."))
        .feature(Feature::classification("risk", "Risk level.", ["low", "high"]))
        .build()
        .unwrap();
    let args = json!({
        "verdict_text": "ship it",
        "has_tests_detected": true,
        "has_tests_rationale": "saw test files",
        "risk": "low",
        "risk_rationale": "small diff"
    });
    fs::write(
        temp.path().join("batch_000000_outputs.jsonl"),
        output_line("a", 200, tool_body("review", args)),
    )
    .unwrap();

    let consolidation = consolidate_dir(temp.path(), &rubric).unwrap();
    let keys: Vec<&str> = consolidation.records[0].features.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["verdict", "has_tests", "risk"]);

    let out = temp.path().join("output.jsonl");
    write_consolidated(&consolidation.records, &out).unwrap();
    let written = fs::read_to_string(&out).unwrap();
    let verdict = written.find("\"verdict\"").unwrap();
    let has_tests = written.find("\"has_tests\"").unwrap();
    let risk = written.find("\"risk\"").unwrap();
    assert!(verdict < has_tests && has_tests < risk);
}

#[test]
fn fingerprint_drift_is_reported_but_records_still_parse() {
    let temp = tempfile::tempdir().unwrap();
    let written_with = Rubric::builder("grade_run", "Grade an agent run.")
        .feature(Feature::binary("looped", "An older wording of the question."))
        .feature(Feature::text("summary", "One-line summary."))
        .build()
        .unwrap();
    let current = grading_rubric();
    assert_ne!(written_with.fingerprint(), current.fingerprint());

    let config = AnnotatorConfig::default();
    BatchWriter::new(temp.path())
        .with_rubric(&written_with)
        .write_requests(vec![written_with.create_text_request("run", &config)])
        .unwrap();
    let args = json!({
        "looped_detected": false,
        "looped_rationale": "",
        "summary_text": "clean run"
    });
    fs::write(
        temp.path().join("batch_000000_outputs.jsonl"),
        output_line("a", 200, tool_body("grade_run", args)),
    )
    .unwrap();

    let consolidation = consolidate_dir(temp.path(), &current).unwrap();
    assert_eq!(
        consolidation.summary.fingerprint_mismatches,
        vec!["batch_000000_inputs.jsonl".to_string()]
    );
    assert_eq!(consolidation.records.len(), 1);
    assert_eq!(
        consolidation.records[0].prediction("summary"),
        Some(Prediction::Text {
            text: "clean run".to_string()
        })
    );
}
