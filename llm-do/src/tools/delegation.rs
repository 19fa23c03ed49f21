//! `worker_call` and `worker_create`.
//!
//! The tools only parse arguments; the run loop supplies the behaviour through
//! [`WorkerDelegator`] and [`WorkerCreator`], which keeps this module free of
//! any dependency on the worker runtime.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, parse_args};
use crate::error::Result;
use crate::io::registry::{WorkerDefinition, WorkerSpec};

/// Runs another worker on behalf of the calling one.
#[async_trait]
pub trait WorkerDelegator: Send + Sync {
    /// Run `worker` with `input` and sandbox-relative `attachments`, returning
    /// its output value.
    async fn call_worker(&self, worker: &str, input: Value, attachments: Vec<String>) -> Result<Value>;
}

/// Persists new worker definitions.
pub trait WorkerCreator: Send + Sync {
    fn create_worker(&self, spec: WorkerSpec, force: bool) -> Result<WorkerDefinition>;
}

pub struct WorkerCallTool {
    delegator: Arc<dyn WorkerDelegator>,
    allowed: Vec<String>,
}

impl WorkerCallTool {
    /// `allowed` is the caller's `allow_workers` list, shown to the model.
    pub fn new(delegator: Arc<dyn WorkerDelegator>, allowed: Vec<String>) -> Self {
        Self { delegator, allowed }
    }
}

#[derive(Deserialize)]
struct CallArgs {
    worker: String,
    #[serde(default)]
    input_data: Option<Value>,
    #[serde(default)]
    attachments: Vec<String>,
}

#[async_trait]
impl Tool for WorkerCallTool {
    fn name(&self) -> &str {
        "worker_call"
    }

    fn description(&self) -> &str {
        "Delegate a task to another worker and return its output. \
         Attachments are sandbox references like 'input/photo.png'."
    }

    fn parameters(&self) -> Value {
        let worker = if self.allowed.iter().any(|name| name == "*") {
            json!({"type": "string"})
        } else {
            json!({"type": "string", "enum": self.allowed})
        };
        json!({
            "type": "object",
            "properties": {
                "worker": worker,
                "input_data": {"description": "Input payload for the worker."},
                "attachments": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["worker"],
            "additionalProperties": false
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: CallArgs = parse_args(self.name(), args)?;
        let input = args.input_data.unwrap_or_else(|| json!({}));
        self.delegator
            .call_worker(&args.worker, input, args.attachments)
            .await
    }
}

pub struct WorkerCreateTool {
    creator: Arc<dyn WorkerCreator>,
}

impl WorkerCreateTool {
    pub fn new(creator: Arc<dyn WorkerCreator>) -> Self {
        Self { creator }
    }
}

#[derive(Deserialize)]
struct CreateArgs {
    name: String,
    instructions: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    output_schema_ref: Option<String>,
    #[serde(default)]
    force: bool,
}

#[async_trait]
impl Tool for WorkerCreateTool {
    fn name(&self) -> &str {
        "worker_create"
    }

    fn description(&self) -> &str {
        "Create and persist a new worker definition."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "pattern": "^[A-Za-z0-9_-]+$"},
                "instructions": {"type": "string"},
                "description": {"type": "string"},
                "model": {"type": "string"},
                "output_schema_ref": {"type": "string"},
                "force": {"type": "boolean"}
            },
            "required": ["name", "instructions"],
            "additionalProperties": false
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: CreateArgs = parse_args(self.name(), args)?;
        let spec = WorkerSpec {
            name: args.name,
            instructions: args.instructions,
            description: args.description,
            model: args.model,
            output_schema_ref: args.output_schema_ref,
        };
        let definition = self.creator.create_worker(spec, args.force)?;
        Ok(serde_json::to_value(&definition)?)
    }
}
