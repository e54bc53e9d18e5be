//! Turns a recorded agent conversation into annotator messages.
//!
//! The annotator sees a fresh system prompt, then the original conversation
//! with the agent's system prompt and tool catalog folded into the first
//! message, tool calls rendered as text, tool results as user messages, and
//! the last agent/user turns fenced with markers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::gateway::{ContentBlock, Message, MessageContent, Role, ToolCall, ToolDefinition};

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("message #{index}: unsupported role '{role}'")]
    UnsupportedRole { index: usize, role: String },

    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("tool call '{name}' has non-JSON arguments: {source}")]
    ToolCallArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("tool #{index}: {message}")]
    MalformedTool { index: usize, message: String },

    #[error("message #{index}: tool result content is empty")]
    EmptyToolResult { index: usize },

    #[error("rubric '{rubric}' has no {which}")]
    MissingRubricMessage { rubric: String, which: &'static str },

    #[error("invalid conversation JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConversionError {
    pub(crate) fn missing_rubric_message(rubric: &str, which: &'static str) -> Self {
        ConversionError::MissingRubricMessage {
            rubric: rubric.to_string(),
            which,
        }
    }
}

// =============================================================================
// INPUT
// =============================================================================

/// One message of a recorded conversation, as logged by the agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool name on `tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TraceMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(MessageContent::Text(content.into())),
            tool_calls: Vec::new(),
            name: None,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| c.joined_text("\n"))
            .unwrap_or_default()
    }
}

/// A recorded conversation plus the tools the agent had available.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationInput {
    #[serde(default)]
    pub messages: Vec<TraceMessage>,
    #[serde(default)]
    pub tools: Vec<Value>,
}

impl ConversationInput {
    pub fn from_json(raw: &str) -> Result<Self, ConversionError> {
        Ok(serde_json::from_str(raw)?)
    }
}

// =============================================================================
// TRANSFORM
// =============================================================================

/// Build annotator messages from a conversation.
///
/// Returns `Ok(None)` when the conversation has no usable system prompt, no
/// user message or no assistant message.
pub fn transform_for_annotator(
    input: &ConversationInput,
    system_message: &str,
    instruction: &str,
) -> Result<Option<Vec<Message>>, ConversionError> {
    let tools = reformat_tools(&input.tools)?;
    let tools_desc = tools_to_description(&tools);

    let Some(original_system) = input.messages.iter().find(|m| m.role == "system") else {
        info!("conversation has no system message, skipping");
        return Ok(None);
    };
    let original_system_text = original_system.text();
    if original_system_text.is_empty() {
        info!("conversation system message is empty, skipping");
        return Ok(None);
    }

    let mut messages: Vec<&TraceMessage> = input.messages.iter().filter(|m| m.role != "system").collect();

    if messages
        .first()
        .is_some_and(|m| m.role == "assistant" && m.tool_calls.is_empty() && m.text().is_empty())
    {
        info!("dropping leading empty assistant message");
        messages.remove(0);
    }

    let Some(last_user_idx) = messages.iter().rposition(|m| m.role == "user") else {
        info!("conversation has no user message, skipping");
        return Ok(None);
    };
    let Some(last_asst_idx) = messages.iter().rposition(|m| m.role == "assistant") else {
        info!("conversation has no assistant message, skipping");
        return Ok(None);
    };

    let mut transformed = vec![Message::with_blocks(
        Role::System,
        vec![ContentBlock::text(system_message)],
    )];

    for (i, m) in messages.iter().enumerate() {
        let mut blocks = m.content.clone().unwrap_or_default().into_blocks();
        for block in &mut blocks {
            block.extra.remove("cache_control");
        }

        if i == 0 {
            let header = format!(
                "<< BEGIN ORIGINAL SYSTEM MESSAGE>>\n{original_system_text}\n<< END ORIGINAL SYSTEM MESSAGE >>\n\
                 \n<< BEGIN TOOLS DESCRIPTION >>\n{tools_desc}\n<< END TOOLS DESCRIPTION >>\n\n"
            );
            blocks = wrap(
                blocks,
                vec![
                    ContentBlock::text(header),
                    ContentBlock::text("<< BEGIN FIRST USER MESSAGE >>\n"),
                ],
                vec![ContentBlock::text("\n<< END FIRST USER MESSAGE >>")],
            );
        }

        match m.role.as_str() {
            "assistant" => {
                for call in &m.tool_calls {
                    append_tool_call(&mut blocks, &tool_call_to_string(call)?);
                }
            }
            "tool" => {
                if blocks.is_empty() {
                    return Err(ConversionError::EmptyToolResult { index: i });
                }
                let name = m.name.as_deref().unwrap_or("function");
                let mut with_prefix = vec![ContentBlock::text(format!("EXECUTION RESULT of [{name}]:\n"))];
                with_prefix.extend(blocks);
                transformed.push(Message::with_blocks(Role::User, with_prefix));
                continue;
            }
            _ => {}
        }

        if i == last_asst_idx && m.role == "assistant" {
            blocks = wrap(
                blocks,
                vec![ContentBlock::text("<< BEGIN LAST AGENT MESSAGE >>\n")],
                vec![ContentBlock::text("\n<< END LAST AGENT MESSAGE >>")],
            );
        }

        if i == last_user_idx && m.role == "user" && last_user_idx > last_asst_idx {
            blocks = wrap(
                blocks,
                vec![ContentBlock::text("<< BEGIN LAST USER MESSAGE >>\n")],
                vec![
                    ContentBlock::text("<< END LAST USER MESSAGE >>\n"),
                    ContentBlock::text(instruction.trim()),
                ],
            );
        }

        let role = match m.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(ConversionError::UnsupportedRole {
                    index: i,
                    role: other.to_string(),
                })
            }
        };
        transformed.push(Message::with_blocks(role, blocks));
    }

    Ok(Some(transformed))
}

fn wrap(blocks: Vec<ContentBlock>, mut before: Vec<ContentBlock>, after: Vec<ContentBlock>) -> Vec<ContentBlock> {
    before.extend(blocks);
    before.extend(after);
    before
}

fn append_tool_call(blocks: &mut Vec<ContentBlock>, rendered: &str) {
    match blocks.last_mut() {
        Some(last) if last.is_text() => {
            let joined = format!("{}\n\n{rendered}", last.text.as_deref().unwrap_or_default());
            last.text = Some(joined.trim_start().to_string());
        }
        _ => blocks.push(ContentBlock::text(rendered)),
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Render a tool call as `<function=NAME>` with one `<parameter=KEY>` per argument.
pub fn tool_call_to_string(call: &ToolCall) -> Result<String, ConversionError> {
    if call.id.is_none() {
        return Err(ConversionError::MalformedToolCall(format!(
            "tool call '{}' has no id",
            call.function.name
        )));
    }
    if call.kind != "function" {
        return Err(ConversionError::MalformedToolCall(format!(
            "tool call type must be 'function', got '{}'",
            call.kind
        )));
    }
    let args: Value =
        serde_json::from_str(&call.function.arguments).map_err(|source| ConversionError::ToolCallArguments {
            name: call.function.name.clone(),
            source,
        })?;
    let Value::Object(args) = args else {
        return Err(ConversionError::MalformedToolCall(format!(
            "arguments of '{}' are not an object",
            call.function.name
        )));
    };

    let mut out = format!("<function={}>\n", call.function.name);
    for (name, value) in &args {
        let multiline = matches!(value, Value::String(s) if s.contains('\n'));
        out.push_str(&format!("<parameter={name}>"));
        if multiline {
            out.push('\n');
        }
        out.push_str(&scalar_text(value));
        if multiline {
            out.push('\n');
        }
        out.push_str("</parameter>\n");
    }
    out.push_str("</function>");
    Ok(out)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a tool catalog into OpenAI function tools.
///
/// Catalogs already in `{type: "function", function: {...}}` form pass
/// through; `{name, description, input_schema}` entries are converted.
pub fn reformat_tools(tools: &[Value]) -> Result<Vec<ToolDefinition>, ConversionError> {
    if tools.iter().all(is_function_tool) {
        return Ok(tools
            .iter()
            .filter_map(|t| t.get("function"))
            .map(|f| {
                ToolDefinition::function(
                    f.get("name").and_then(Value::as_str).unwrap_or_default(),
                    f.get("description").and_then(Value::as_str).unwrap_or_default(),
                    f.get("parameters").cloned().unwrap_or(Value::Null),
                )
            })
            .collect());
    }

    tools
        .iter()
        .enumerate()
        .map(|(index, tool)| -> Result<ToolDefinition, ConversionError> {
            let malformed = |message: &str| ConversionError::MalformedTool {
                index,
                message: message.to_string(),
            };
            let name = tool
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("tool must have a 'name'"))?;
            let schema = tool
                .get("input_schema")
                .filter(|s| s.is_object())
                .ok_or_else(|| malformed("tool must have an object 'input_schema'"))?;
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("tool must have a 'description'"))?;
            Ok(ToolDefinition::function(name, description, schema.clone()))
        })
        .collect()
}

fn is_function_tool(tool: &Value) -> bool {
    tool.get("type").and_then(Value::as_str) == Some("function")
        && tool
            .get("function")
            .is_some_and(|f| f.get("name").is_some() && f.get("parameters").is_some_and(Value::is_object))
}

/// Human-readable catalog of tools and their parameters.
pub fn tools_to_description(tools: &[ToolDefinition]) -> String {
    let mut out = String::new();
    for (i, tool) in tools.iter().enumerate() {
        let f = &tool.function;
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("---- BEGIN FUNCTION #{}: {} ----\n", i + 1, f.name));
        out.push_str(&format!("Description: {}\n", f.description));

        match f.parameters.as_object() {
            Some(params) => {
                out.push_str("Parameters:\n");
                let empty = Map::new();
                let properties = params
                    .get("properties")
                    .and_then(Value::as_object)
                    .unwrap_or(&empty);
                let required: Vec<&str> = params
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();

                for (j, (name, info)) in properties.iter().enumerate() {
                    let status = if required.contains(&name.as_str()) {
                        "required"
                    } else {
                        "optional"
                    };
                    let ty = info.get("type").map(scalar_text).unwrap_or_else(|| "string".to_string());
                    let mut desc = info
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("No description provided")
                        .to_string();
                    if let Some(values) = info.get("enum").and_then(Value::as_array) {
                        let allowed: Vec<String> = values.iter().map(|v| format!("`{}`", scalar_text(v))).collect();
                        desc.push_str(&format!("\nAllowed values: [{}]", allowed.join(", ")));
                    }
                    out.push_str(&format!("  ({}) {name} ({ty}, {status}): {desc}\n", j + 1));
                }
            }
            None => out.push_str("No parameters are required for this function.\n"),
        }

        out.push_str(&format!("---- END FUNCTION #{} ----\n", i + 1));
    }
    out
}
