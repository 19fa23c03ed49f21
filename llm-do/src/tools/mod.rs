//! Tools exposed to models, and the registry that dispatches their calls.
//!
//! A [`ToolRegistry`] is assembled per worker run from the worker's
//! configuration. Dispatch validates arguments against the tool's JSON Schema
//! and passes gated tools through the run's [`ApprovalSession`] before
//! executing them.

pub mod delegation;
pub mod sandbox;
pub mod toolbox;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::approval::{Approval, ApprovalSession};
use crate::core::types::{ToolCall, ToolDefinition};
use crate::error::{Error, Result};
use crate::io::schema::validate_against;

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the argument object.
    fn parameters(&self) -> Value;

    /// Side-effecting tools go through the approval gate.
    fn requires_approval(&self) -> bool {
        false
    }

    async fn call(&self, args: Value) -> Result<Value>;
}

/// What happened to one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool ran; this is its result.
    Output(Value),
    /// The human declined the call at the approval prompt.
    Declined,
    /// The call was malformed; the message goes back to the model.
    Retry(String),
}

/// Message sent to the model when a gated call is declined.
pub const DECLINED_MESSAGE: &str = "Tool call was declined by the user and did not run.";

/// Tools available to one worker run, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
    }

    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Validate, gate and execute one call.
    ///
    /// Unknown tools and invalid arguments come back as [`ToolOutcome::Retry`];
    /// failures inside the tool and a quit at the prompt are errors.
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
    pub async fn invoke(&self, call: &ToolCall, approvals: &ApprovalSession) -> Result<ToolOutcome> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("model called an unknown tool");
            return Ok(ToolOutcome::Retry(format!(
                "Unknown tool '{}'. Available tools: {}",
                call.name,
                self.names().join(", ")
            )));
        };
        if !call.arguments.is_object() {
            return Ok(ToolOutcome::Retry(format!(
                "Arguments for '{}' must be a JSON object, got: {}",
                call.name, call.arguments
            )));
        }
        if let Err(err) = validate_against(&tool.parameters(), &call.arguments, "arguments") {
            debug!(error = %err, "tool arguments rejected");
            return Ok(ToolOutcome::Retry(format!(
                "Invalid arguments for '{}': {err}. Fix the arguments and try again.",
                call.name
            )));
        }
        if tool.requires_approval()
            && approvals.check(&call.name, &call.arguments)? == Approval::Declined
        {
            return Ok(ToolOutcome::Declined);
        }
        let output = tool.call(call.arguments.clone()).await?;
        Ok(ToolOutcome::Output(output))
    }
}

/// Deserialize validated tool arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|err| Error::InvalidInput(format!("arguments for {tool}: {err}")))
}
