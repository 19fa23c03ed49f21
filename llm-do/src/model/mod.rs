//! Model access behind a small async trait.
//!
//! The run loop only sees [`ModelClient`]; [`ModelProvider`] turns a
//! `provider:model` identifier into a client. [`HttpModelProvider`] is the
//! production factory; tests use `test_support::ScriptedProvider`.

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::types::{Message, ModelResponse, ToolDefinition};
use crate::error::{Error, Result};

/// One round trip to a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
}

/// A chat model that can return tool calls.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Full `provider:model` identifier.
    fn model_id(&self) -> &str;

    /// Media types this model accepts as attachments.
    fn attachment_types(&self) -> &[&'static str] {
        &[]
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse>;
}

/// Factory for model clients.
pub trait ModelProvider: Send + Sync {
    fn client(&self, model_id: &str) -> Result<Arc<dyn ModelClient>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }
}

/// A parsed `provider:model` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    pub provider: ProviderKind,
    pub name: String,
}

impl ModelId {
    pub fn parse(id: &str) -> Result<Self> {
        let (provider, name) = id.split_once(':').ok_or_else(|| {
            Error::InvalidInput(format!(
                "model '{id}' must look like 'provider:model' (anthropic:..., openai:...)"
            ))
        })?;
        let provider = match provider.trim().to_lowercase().as_str() {
            "anthropic" => ProviderKind::Anthropic,
            "openai" => ProviderKind::OpenAi,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown model provider '{other}' in '{id}'"
                )));
            }
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(format!("model '{id}' has an empty name")));
        }
        Ok(Self {
            provider,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider.as_str(), self.name)
    }
}

/// Builds HTTP clients for hosted providers.
///
/// API keys come from `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`; base URLs can be
/// overridden with `ANTHROPIC_BASE_URL` / `OPENAI_BASE_URL`.
#[derive(Debug, Clone, Default)]
pub struct HttpModelProvider {
    http: reqwest::Client,
}

impl HttpModelProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelProvider for HttpModelProvider {
    fn client(&self, model_id: &str) -> Result<Arc<dyn ModelClient>> {
        let id = ModelId::parse(model_id)?;
        match id.provider {
            ProviderKind::Anthropic => {
                let api_key = require_env("ANTHROPIC_API_KEY")?;
                let base_url = std::env::var("ANTHROPIC_BASE_URL").ok();
                Ok(Arc::new(AnthropicClient::new(
                    self.http.clone(),
                    id,
                    api_key,
                    base_url,
                )))
            }
            ProviderKind::OpenAi => {
                let api_key = require_env("OPENAI_API_KEY")?;
                let base_url = std::env::var("OPENAI_BASE_URL").ok();
                Ok(Arc::new(OpenAiClient::new(self.http.clone(), id, api_key, base_url)))
            }
        }
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::InvalidInput(format!("{name} is not set"))),
    }
}

/// Turn a non-success HTTP response into a `ModelFailure`.
pub(crate) async fn failure_from_response(provider: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);
    Error::ModelFailure(format!("{provider} returned {status}: {detail}"))
}

pub(crate) fn transport_failure(provider: &str, err: reqwest::Error) -> Error {
    Error::ModelFailure(format!("{provider} request failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_prefixed_ids() {
        let id = ModelId::parse("anthropic:claude-sonnet-4-5").expect("parse");
        assert_eq!(id.provider, ProviderKind::Anthropic);
        assert_eq!(id.name, "claude-sonnet-4-5");
        assert_eq!(id.to_string(), "anthropic:claude-sonnet-4-5");

        let id = ModelId::parse("OpenAI:gpt-4o-mini").expect("parse");
        assert_eq!(id.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["gpt-4o", "mistral:large", "openai:", ""] {
            assert!(
                matches!(ModelId::parse(bad), Err(Error::InvalidInput(_))),
                "{bad}"
            );
        }
    }
}
