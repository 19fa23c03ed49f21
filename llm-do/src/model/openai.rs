//! OpenAI Chat Completions client.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{ModelClient, ModelId, ModelRequest, failure_from_response, transport_failure};
use crate::core::types::{Attachment, Message, ModelResponse, ToolCall, ToolDefinition};
use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

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

pub struct OpenAiClient {
    http: Client,
    id: ModelId,
    model_id: String,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
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
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Debug, Deserialize)]
struct ChatFunction {
    name: String,
    arguments: String,
}

fn attachment_part(attachment: &Attachment) -> Result<Value> {
    let media_type = attachment.media_type.as_str();
    let data_url = || format!("data:{media_type};base64,{}", BASE64.encode(&attachment.data));
    if media_type.starts_with("image/") && ATTACHMENT_TYPES.contains(&media_type) {
        return Ok(json!({"type": "image_url", "image_url": {"url": data_url()}}));
    }
    if media_type == "application/pdf" {
        return Ok(json!({
            "type": "file",
            "file": {"filename": attachment.name, "file_data": data_url()}
        }));
    }
    if ATTACHMENT_TYPES.contains(&media_type)
        && let Some(text) = attachment.as_text()
    {
        return Ok(json!({
            "type": "text",
            "text": format!("<attachment name=\"{}\">\n{text}\n</attachment>", attachment.name)
        }));
    }
    Err(Error::InvalidInput(format!(
        "openai models cannot accept attachment {} ({media_type})",
        attachment.name
    )))
}

fn build_messages(system: &str, messages: &[Message]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(json!({"role": "system", "content": system}));
    }
    for message in messages {
        match message {
            Message::User {
                content,
                attachments,
            } if attachments.is_empty() => {
                out.push(json!({"role": "user", "content": content}));
            }
            Message::User {
                content,
                attachments,
            } => {
                let mut parts = vec![json!({"type": "text", "text": content})];
                for attachment in attachments {
                    parts.push(attachment_part(attachment)?);
                }
                out.push(json!({"role": "user", "content": parts}));
            }
            Message::Assistant { text, tool_calls } => {
                let mut entry = json!({"role": "assistant", "content": text});
                if !tool_calls.is_empty() {
                    entry["tool_calls"] = tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                out.push(entry);
            }
            Message::ToolResult {
                call_id, content, ..
            } => {
                let text = match content {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                out.push(json!({"role": "tool", "tool_call_id": call_id, "content": text}));
            }
        }
    }
    Ok(out)
}

fn tools(definitions: &[ToolDefinition]) -> Vec<Value> {
    definitions
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

fn into_model_response(response: ChatResponse) -> Result<ModelResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::ModelFailure("openai returned no choices".to_string()))?;
    debug!(finish_reason = ?choice.finish_reason, "openai response");
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            // Unparseable arguments are passed on as a string so validation
            // can report them back to the model.
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
        })
        .collect();
    Ok(ModelResponse {
        text: choice.message.content.filter(|text| !text.is_empty()),
        tool_calls,
    })
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn attachment_types(&self) -> &[&'static str] {
        ATTACHMENT_TYPES
    }

    #[instrument(skip_all, fields(model = %self.model_id, messages = request.messages.len()))]
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        let body = ChatRequest {
            model: &self.id.name,
            messages: build_messages(request.system, request.messages)?,
            tools: tools(request.tools),
        };
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_failure("openai", err))?;
        if !response.status().is_success() {
            return Err(failure_from_response("openai", response).await);
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| Error::ModelFailure(format!("openai response unreadable: {err}")))?;
        into_model_response(parsed)
    }
}
