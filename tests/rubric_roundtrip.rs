//! Schema compilation and tool-call parsing through the public API.

use critic_rubrics::gateway::ToolCall;
use critic_rubrics::rubrics::{annotate_conversation_with_user_rubric, solvability_rubric};
use critic_rubrics::{
    DefinitionError, Feature, FieldError, Prediction, PredictionType, Rubric, ToolCallError,
};
use serde_json::{json, Map, Value};

/// A plausible value for every feature of `rubric`, in the flat wire form.
fn synthetic_args(rubric: &Rubric) -> (Map<String, Value>, Vec<Prediction>) {
    let mut args = Map::new();
    let mut expected = Vec::new();
    for (i, feature) in rubric.features().iter().enumerate() {
        let prediction = match &feature.prediction_type {
            PredictionType::Binary { .. } => Prediction::Binary {
                detected: i % 2 == 0,
                rationale: format!("evidence for {}", feature.name),
            },
            PredictionType::Text => Prediction::Text {
                text: format!("notes on {}", feature.name),
            },
            PredictionType::Classification { labels } => Prediction::Classification {
                label: labels[i % labels.len()].clone(),
                rationale: "quoted".to_string(),
            },
        };
        args.extend(prediction.to_tool_args(&feature.name));
        expected.push(prediction);
    }
    (args, expected)
}

#[test]
fn catalog_rubric_round_trips() {
    for rubric in [annotate_conversation_with_user_rubric().unwrap(), solvability_rubric().unwrap()] {
        let (args, expected) = synthetic_args(&rubric);
        let call = ToolCall::new(rubric.tool_name(), Value::Object(args).to_string());
        let data = rubric.tool_call_to_feature_data(&call).unwrap();
        let names: Vec<&str> = data.iter().map(|d| d.name()).collect();
        let declared: Vec<&str> = rubric.features().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, declared);
        let parsed: Vec<Prediction> = data.into_iter().map(|d| d.prediction).collect();
        assert_eq!(parsed, expected);
    }
}

#[test]
fn required_list_is_union_of_feature_keys() {
    let rubric = annotate_conversation_with_user_rubric().unwrap();
    let params = rubric.parameters();
    let required: Vec<String> = params["required"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = rubric.features().iter().flat_map(|f| f.keys()).collect();
    assert_eq!(required, expected);

    let props = params["properties"].as_object().unwrap();
    assert_eq!(props.len(), expected.len());
    for key in &expected {
        assert!(props.contains_key(key), "missing property {key}");
    }
}

#[test]
fn dropping_any_required_key_rejects_whole_call() {
    let rubric = solvability_rubric().unwrap();
    let (args, _) = synthetic_args(&rubric);
    for key in rubric.tool_properties().required {
        let mut partial = args.clone();
        partial.remove(&key);
        let call = ToolCall::new(rubric.tool_name(), Value::Object(partial).to_string());
        match rubric.tool_call_to_feature_data(&call) {
            Err(ToolCallError::Field(FieldError::Missing { key: missing, .. })) => assert_eq!(missing, key),
            other => panic!("expected missing-field error for {key}, got {other:?}"),
        }
    }
}

#[test]
fn classification_out_of_domain_label_fails() {
    let rubric = Rubric::builder("grade", "Grade a run.")
        .feature(Feature::classification("outcome", "Did it pass?", ["pass", "fail"]))
        .build()
        .unwrap();
    let call = ToolCall::new(
        "grade",
        json!({"outcome": "maybe", "outcome_rationale": "unclear"}).to_string(),
    );
    let err = rubric.tool_call_to_feature_data(&call).unwrap_err();
    assert!(matches!(
        err,
        ToolCallError::Field(FieldError::InvalidLabel { ref feature, .. }) if feature == "outcome"
    ));
}

#[test]
fn colliding_keys_fail_for_every_colliding_pair() {
    let pairs = [
        (Feature::text("result", "a"), Feature::text("result", "b")),
        (Feature::binary("a", "x"), Feature::classification("a_rationale", "y", ["l"])),
        (Feature::classification("b", "x", ["l"]), Feature::binary("b", "y")),
        (Feature::text("c", "x"), Feature::classification("c_text", "y", ["l"])),
    ];
    for (first, second) in pairs {
        let err = Rubric::builder("t", "d")
            .feature(first.clone())
            .feature(second.clone())
            .build()
            .unwrap_err();
        assert!(
            matches!(
                err,
                DefinitionError::DuplicateFeature { .. } | DefinitionError::KeyCollision { .. }
            ),
            "{} / {} should collide, got {err:?}",
            first.name,
            second.name
        );
    }
}

#[test]
fn suffixed_names_that_do_not_share_keys_build() {
    let rubric = Rubric::builder("t", "d")
        .feature(Feature::binary("a", "x"))
        .feature(Feature::text("a_rationale", "y"))
        .build()
        .unwrap();
    let required = rubric.tool_properties().required;
    assert_eq!(required, vec!["a_detected", "a_rationale", "a_rationale_text"]);
}

#[test]
fn mismatch_detection_across_candidate_rubrics() {
    let conversation = annotate_conversation_with_user_rubric().unwrap();
    let solvability = solvability_rubric().unwrap();
    let (args, _) = synthetic_args(&solvability);
    let call = ToolCall::new(solvability.tool_name(), Value::Object(args).to_string());

    let candidates = [&conversation, &solvability];
    let matched: Vec<&str> = candidates
        .iter()
        .filter(|r| r.tool_call_match_rubrics(&call))
        .map(|r| r.tool_name())
        .collect();
    assert_eq!(matched, vec!["analyze_issue_solvability"]);
    assert!(matches!(
        conversation.tool_call_to_feature_data(&call),
        Err(ToolCallError::RubricMismatch { .. })
    ));
}
