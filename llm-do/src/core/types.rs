//! Message and tool-call types exchanged between the run loop and models.
//!
//! These are the wire contract for the tool-calling boundary. They carry no
//! provider-specific shape; adapters in `model/` translate them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A file attached to a user message.
///
/// The bytes are sent to the model but never serialized into transcripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name (file name, or `sandbox/relative` for sandbox references).
    pub name: String,
    pub media_type: String,
    pub size: u64,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    /// Attachment content as text, when it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// A structured request from the model to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's argument object.
    pub parameters: Value,
}

/// One entry in a worker transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// What a model returned for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            text: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }

    pub fn into_message(self) -> Message {
        Message::Assistant {
            text: self.text,
            tool_calls: self.tool_calls,
        }
    }
}

/// Final result of a worker run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRunResult {
    pub output: Value,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Render arbitrary worker input as prompt text.
///
/// Strings pass through unchanged; structured input becomes pretty JSON with
/// sorted keys so prompts are deterministic.
pub fn stringify_input(input: &Value) -> String {
    match input {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(&sorted(other)).unwrap_or_else(|_| other.to_string()),
    }
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_passes_strings_through() {
        assert_eq!(stringify_input(&json!("Tell me a joke")), "Tell me a joke");
    }

    #[test]
    fn stringify_sorts_object_keys() {
        let text = stringify_input(&json!({"b": 1, "a": {"d": 2, "c": 3}}));
        let a = text.find("\"a\"").expect("a");
        let b = text.find("\"b\"").expect("b");
        let c = text.find("\"c\"").expect("c");
        let d = text.find("\"d\"").expect("d");
        assert!(a < b);
        assert!(c < d);
    }

    #[test]
    fn transcript_omits_attachment_bytes() {
        let message = Message::User {
            content: "look".to_string(),
            attachments: vec![Attachment {
                name: "input/board.png".to_string(),
                media_type: "image/png".to_string(),
                size: 4,
                data: vec![1, 2, 3, 4],
            }],
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["kind"], "user");
        assert_eq!(value["attachments"][0]["name"], "input/board.png");
        assert!(value["attachments"][0].get("data").is_none());
    }
}
