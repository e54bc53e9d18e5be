//! Conversation-to-annotator transform on a recorded agent run.

use critic_rubrics::gateway::{Message, MessageContent, Role};
use critic_rubrics::rubrics::{annotate_conversation_with_user_rubric, trajectory_with_user};
use critic_rubrics::{transform_for_annotator, AnnotatorConfig, ConversationInput, ConversionError};

const RECORDED_RUN: &str = r#"{
  "messages": [
    {"role": "system", "content": "You are a coding agent."},
    {"role": "user", "content": "Fix the failing test."},
    {"role": "assistant", "content": "Looking at the repo.", "tool_calls": [
      {"id": "call_1", "type": "function",
       "function": {"name": "execute_bash", "arguments": "{\"command\": \"cargo test\"}"}}
    ]},
    {"role": "tool", "name": "execute_bash", "content": "1 passed"},
    {"role": "assistant", "content": "All tests pass now."},
    {"role": "user", "content": [
      {"type": "text", "text": "You changed the wrong file.", "cache_control": {"type": "ephemeral"}}
    ]}
  ],
  "tools": [
    {"type": "function", "function": {
      "name": "execute_bash",
      "description": "Run a shell command.",
      "parameters": {"type": "object",
        "properties": {"command": {"type": "string", "description": "The command."}},
        "required": ["command"]}
    }}
  ]
}"#;

fn texts(message: &Message) -> Vec<String> {
    match &message.content {
        MessageContent::Text(text) => vec![text.clone()],
        MessageContent::Blocks(blocks) => blocks.iter().filter_map(|b| b.text.clone()).collect(),
    }
}

#[test]
fn recorded_run_is_wrapped_with_markers() {
    let input = ConversationInput::from_json(RECORDED_RUN).unwrap();
    let messages = transform_for_annotator(&input, "judge prompt", "  annotate now  ")
        .unwrap()
        .unwrap();

    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(texts(&messages[0]), vec!["judge prompt"]);

    let first = texts(&messages[1]);
    assert!(first[0].starts_with("<< BEGIN ORIGINAL SYSTEM MESSAGE>>\nYou are a coding agent.\n"));
    assert!(first[0].contains("<< BEGIN TOOLS DESCRIPTION >>\n---- BEGIN FUNCTION #1: execute_bash ----"));
    assert_eq!(first[1], "<< BEGIN FIRST USER MESSAGE >>\n");
    assert_eq!(first[2], "Fix the failing test.");
    assert_eq!(first[3], "\n<< END FIRST USER MESSAGE >>");

    assert_eq!(
        texts(&messages[2]),
        vec![
            "Looking at the repo.\n\n<function=execute_bash>\n<parameter=command>cargo test</parameter>\n</function>"
        ]
    );
    assert_eq!(
        texts(&messages[3]),
        vec!["EXECUTION RESULT of [execute_bash]:\n", "1 passed"]
    );
    assert_eq!(
        texts(&messages[4]),
        vec![
            "<< BEGIN LAST AGENT MESSAGE >>\n",
            "All tests pass now.",
            "\n<< END LAST AGENT MESSAGE >>"
        ]
    );
    assert_eq!(
        texts(&messages[5]),
        vec![
            "<< BEGIN LAST USER MESSAGE >>\n",
            "You changed the wrong file.",
            "<< END LAST USER MESSAGE >>\n",
            "annotate now"
        ]
    );
}

#[test]
fn cache_control_is_stripped() {
    let input = ConversationInput::from_json(RECORDED_RUN).unwrap();
    let messages = transform_for_annotator(&input, "judge", "annotate").unwrap().unwrap();
    let serialized = serde_json::to_string(&messages).unwrap();
    assert!(!serialized.contains("cache_control"));
}

#[test]
fn missing_system_message_skips_conversation() {
    let mut input = ConversationInput::from_json(RECORDED_RUN).unwrap();
    input.messages.retain(|m| m.role != "system");
    assert!(transform_for_annotator(&input, "judge", "annotate").unwrap().is_none());
}

#[test]
fn unsupported_role_is_rejected() {
    let mut input = ConversationInput::from_json(RECORDED_RUN).unwrap();
    input.messages[2].role = "developer".to_string();
    let err = transform_for_annotator(&input, "judge", "annotate").unwrap_err();
    assert!(matches!(err, ConversionError::UnsupportedRole { ref role, .. } if role == "developer"));
}

#[test]
fn rubric_request_forces_its_tool() {
    let rubric = annotate_conversation_with_user_rubric().unwrap();
    let input = ConversationInput::from_json(RECORDED_RUN).unwrap();
    let config = AnnotatorConfig::default().with_model("test/judge").with_max_tokens(2048);
    let request = rubric.create_annotation_request(&input, &config).unwrap().unwrap();

    assert_eq!(request.model, "test/judge");
    assert_eq!(request.max_tokens, Some(2048));
    assert_eq!(request.tools.len(), 1);
    assert_eq!(request.tools[0].function.name, rubric.tool_name());
    assert_eq!(request.tool_choice.as_ref().unwrap().function.name, rubric.tool_name());
    assert_eq!(texts(&request.messages[0]), vec![trajectory_with_user::SYSTEM_MESSAGE]);

    let last = texts(request.messages.last().unwrap());
    assert_eq!(last.last().unwrap(), trajectory_with_user::INSTRUCTION_MESSAGE.trim());
}
