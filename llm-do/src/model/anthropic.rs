//! Anthropic Messages API client.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{ModelClient, ModelId, ModelRequest, failure_from_response, transport_failure};
use crate::core::types::{Attachment, Message, ModelResponse, ToolCall, ToolDefinition};
use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

const ATTACHMENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/html",
    "application/json",
    "application/yaml",
    "application/toml",
];

pub struct AnthropicClient {
    http: Client,
    id: ModelId,
    model_id: String,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(http: Client, id: ModelId, api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            model_id: id.to_string(),
            id,
            api_key,
            base_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Base64Source {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Base64Source,
    },
    Document {
        source: Base64Source,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn attachment_block(attachment: &Attachment) -> Result<ContentBlock> {
    let media_type = attachment.media_type.as_str();
    let source = || Base64Source {
        kind: "base64".to_string(),
        media_type: media_type.to_string(),
        data: BASE64.encode(&attachment.data),
    };
    if media_type.starts_with("image/") && ATTACHMENT_TYPES.contains(&media_type) {
        return Ok(ContentBlock::Image { source: source() });
    }
    if media_type == "application/pdf" {
        return Ok(ContentBlock::Document { source: source() });
    }
    if ATTACHMENT_TYPES.contains(&media_type)
        && let Some(text) = attachment.as_text()
    {
        return Ok(ContentBlock::Text {
            text: format!("<attachment name=\"{}\">\n{text}\n</attachment>", attachment.name),
        });
    }
    Err(Error::InvalidInput(format!(
        "anthropic models cannot accept attachment {} ({media_type})",
        attachment.name
    )))
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Translate the transcript, merging consecutive tool results into one user turn.
fn build_messages(messages: &[Message]) -> Result<Vec<AnthropicMessage>> {
    let mut out: Vec<AnthropicMessage> = Vec::new();
    for message in messages {
        match message {
            Message::User {
                content,
                attachments,
            } => {
                let mut blocks = vec![ContentBlock::Text {
                    text: content.clone(),
                }];
                for attachment in attachments {
                    blocks.push(attachment_block(attachment)?);
                }
                out.push(AnthropicMessage {
                    role: "user",
                    content: blocks,
                });
            }
            Message::Assistant { text, tool_calls } => {
                let mut blocks = Vec::new();
                if let Some(text) = text.as_ref().filter(|t| !t.is_empty()) {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                }
                for call in tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                out.push(AnthropicMessage {
                    role: "assistant",
                    content: blocks,
                });
            }
            Message::ToolResult {
                call_id,
                content,
                is_error,
                ..
            } => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: call_id.clone(),
                    content: tool_result_text(content),
                    is_error: *is_error,
                };
                match out.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last
                                .content
                                .iter()
                                .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                    {
                        last.content.push(block);
                    }
                    _ => out.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }
    Ok(out)
}

fn tools(definitions: &[ToolDefinition]) -> Vec<AnthropicTool<'_>> {
    definitions
        .iter()
        .map(|tool| AnthropicTool {
            name: &tool.name,
            description: &tool.description,
            input_schema: &tool.parameters,
        })
        .collect()
}

fn into_model_response(response: AnthropicResponse) -> ModelResponse {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            _ => {}
        }
    }
    ModelResponse {
        text: (!texts.is_empty()).then(|| texts.join("\n")),
        tool_calls,
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn attachment_types(&self) -> &[&'static str] {
        ATTACHMENT_TYPES
    }

    #[instrument(skip_all, fields(model = %self.model_id, messages = request.messages.len()))]
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        let body = AnthropicRequest {
            model: &self.id.name,
            max_tokens: MAX_TOKENS,
            system: request.system,
            messages: build_messages(request.messages)?,
            tools: tools(request.tools),
        };
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_failure("anthropic", err))?;
        if !response.status().is_success() {
            return Err(failure_from_response("anthropic", response).await);
        }
        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|err| Error::ModelFailure(format!("anthropic response unreadable: {err}")))?;
        debug!(stop_reason = ?parsed.stop_reason, "anthropic response");
        Ok(into_model_response(parsed))
    }
}
