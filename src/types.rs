//! Core type definitions for messages, content parts, and agent configuration.
//!
//! Assistant turns mix text, reasoning, and tool-calls; we model that as an
//! ordered list of tagged variants (`ContentPart`) rather than parallel
//! fields, so a single pass over content yields the exact emission order a
//! provider streamed them in.

use serde::{Deserialize, Serialize};

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tagged unit of content inside a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text produced by the model or supplied by the caller.
    Text { text: String },

    /// Reasoning/thinking text, preserved verbatim so replays see identical
    /// content.
    Reasoning { text: String },

    /// A tool invocation requested by the model.
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    /// The result of executing a tool call, tagged back to its id.
    ToolResult {
        id: String,
        name: String,
        output: ToolOutput,
        #[serde(default)]
        is_error: bool,
    },
}

/// Output payload of a tool execution: either free text or structured JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl ToolOutput {
    /// Render as a string, JSON-encoding structured output.
    pub fn as_text(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Structured(v) => v.to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        ToolOutput::Text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        ToolOutput::Text(value.to_string())
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        ToolOutput::Structured(value)
    }
}

/// The content of a message: either a bare string or an ordered sequence of
/// tagged parts. Mirrors the text-vs-parts duality a provider wire format
/// exposes, but at the internal-history level rather than on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten to a single display string. Tool-call parts render as a
    /// short marker; tool-result parts render their output.
    pub fn to_display_string(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::Reasoning { text } => text.clone(),
                    ContentPart::ToolCall { name, .. } => format!("[tool_call:{name}]"),
                    ContentPart::ToolResult { output, .. } => output.as_text(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Tool-call ids present in this content, in emission order.
    pub fn tool_call_ids(&self) -> Vec<String> {
        match self {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolCall { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A single message in a conversation history.
///
/// Invariant: every `Role::Tool` message carries `tool_call_id` both at the
/// top level (for provider compatibility) and inside its content part;
/// `Message::tool_result` enforces both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: MessageContent) -> Self {
        Message {
            role: Role::Assistant,
            content,
            tool_call_id: None,
        }
    }

    /// Build a tool-role message, setting `tool_call_id` at both levels.
    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        output: ToolOutput,
        is_error: bool,
    ) -> Self {
        let id = id.into();
        Message {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                id: id.clone(),
                name: name.into(),
                output,
                is_error,
            }]),
            tool_call_id: Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_carries_id_at_both_levels() {
        let msg = Message::tool_result("call_1", "bash", ToolOutput::Text("ok".into()), false);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        match &msg.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { id, .. } => assert_eq!(id, "call_1"),
                _ => panic!("expected ToolResult part"),
            },
            _ => panic!("expected Parts content"),
        }
    }

    #[test]
    fn tool_call_ids_preserve_emission_order() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "thinking".into(),
            },
            ContentPart::ToolCall {
                id: "a".into(),
                name: "bash".into(),
                args: serde_json::json!({}),
            },
            ContentPart::ToolCall {
                id: "b".into(),
                name: "bash".into(),
                args: serde_json::json!({}),
            },
        ]);
        assert_eq!(content.tool_call_ids(), vec!["a", "b"]);
    }

    #[test]
    fn text_only_message_serializes_as_string() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "hi");
    }
}
