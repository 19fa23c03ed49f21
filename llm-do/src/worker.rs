//! Worker execution and delegation.
//!
//! One async routine runs a worker to completion. [`run_worker_async`] is the
//! cooperative entry point; [`run_worker`] is the blocking one and builds its
//! own current-thread runtime. Delegation from the `worker_call` tool always
//! stays on the async path, so a nested worker never starts a second event
//! loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::approval::ApprovalSession;
use crate::core::call_stack::{CallStack, DEFAULT_MAX_DEPTH};
use crate::core::types::{Attachment, Message, WorkerRunResult, stringify_input};
use crate::error::{Error, Result};
use crate::io::attachments::load_attachments;
use crate::io::config::RuntimeConfig;
use crate::io::prompt::worker_instructions;
use crate::io::registry::{WorkerCreationProfile, WorkerDefinition, WorkerRegistry, WorkerSpec};
use crate::io::sandbox::SandboxManager;
use crate::io::schema::parse_structured_output;
use crate::model::{ModelClient, ModelProvider, ModelRequest};
use crate::tools::delegation::{WorkerCallTool, WorkerCreateTool, WorkerCreator, WorkerDelegator};
use crate::tools::sandbox::sandbox_tools;
use crate::tools::{DECLINED_MESSAGE, ToolOutcome, ToolRegistry};

/// Limits applied to every worker in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_depth: usize,
    pub max_turns: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_turns: 20,
        }
    }
}

impl From<&RuntimeConfig> for RuntimeSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_turns: config.max_turns,
        }
    }
}

/// Receives transcript events as a run progresses.
pub trait RunObserver: Send + Sync {
    fn worker_started(&self, _worker: &str, _model: &str, _instructions: &str) {}

    fn message(&self, worker: &str, message: &Message);
}

/// Shared state for one top-level invocation and every delegation under it.
pub struct Runtime {
    registry: WorkerRegistry,
    provider: Arc<dyn ModelProvider>,
    approvals: ApprovalSession,
    profile: WorkerCreationProfile,
    settings: RuntimeSettings,
    cli_model: Option<String>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Runtime {
    pub fn new(
        registry: WorkerRegistry,
        provider: Arc<dyn ModelProvider>,
        approvals: ApprovalSession,
    ) -> Self {
        Self {
            registry,
            provider,
            approvals,
            profile: WorkerCreationProfile::default(),
            settings: RuntimeSettings::default(),
            cli_model: None,
            observer: None,
        }
    }

    pub fn with_profile(mut self, profile: WorkerCreationProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Model used for the entry worker, ahead of its own configuration.
    pub fn with_cli_model(mut self, model: Option<String>) -> Self {
        self.cli_model = model;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn approvals(&self) -> &ApprovalSession {
        &self.approvals
    }
}

/// A top-level request to run a worker.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub worker: String,
    pub input: Value,
    /// Files given on the command line, checked against the worker's policy.
    pub attachments: Vec<PathBuf>,
}

impl WorkerRequest {
    pub fn new(worker: impl Into<String>, input: Value) -> Self {
        Self {
            worker: worker.into(),
            input,
            attachments: Vec::new(),
        }
    }
}

/// Blocking entry point.
///
/// Fails with `InvalidInput` when called from inside a tokio runtime; use
/// [`run_worker_async`] there.
pub fn run_worker(runtime: Arc<Runtime>, request: WorkerRequest) -> Result<WorkerRunResult> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(Error::InvalidInput(
            "run_worker cannot block inside an async runtime; use run_worker_async".to_string(),
        ));
    }
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build async runtime")?;
    rt.block_on(run_worker_async(runtime, request))
}

/// Cooperative entry point.
#[instrument(skip_all, fields(worker = %request.worker))]
pub async fn run_worker_async(runtime: Arc<Runtime>, request: WorkerRequest) -> Result<WorkerRunResult> {
    let definition = runtime.registry.load(&request.worker)?;
    let names: Vec<String> = request
        .attachments
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    let attachments = load_attachments(&definition.attachment_policy, &request.attachments, &names)?;
    let stack = CallStack::root(&definition.name, runtime.settings.max_depth);
    let model_override = runtime.cli_model.clone();
    execute(runtime, definition, request.input, attachments, stack, model_override, None).await
}

/// Effective model: override, then the worker's own, then the caller's, then
/// the profile default.
pub fn resolve_model(
    override_model: Option<&str>,
    worker_model: Option<&str>,
    caller_model: Option<&str>,
    profile_default: Option<&str>,
) -> Result<String> {
    override_model
        .or(worker_model)
        .or(caller_model)
        .or(profile_default)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidInput(
                "no model configured: pass --model, set `model` on the worker, or give a profile default_model"
                    .to_string(),
            )
        })
}

#[instrument(skip_all, fields(worker = %definition.name, depth = stack.depth()))]
async fn execute(
    runtime: Arc<Runtime>,
    definition: WorkerDefinition,
    input: Value,
    attachments: Vec<Attachment>,
    stack: CallStack,
    model_override: Option<String>,
    caller_model: Option<String>,
) -> Result<WorkerRunResult> {
    let instructions = worker_instructions(&runtime.registry, &definition)?;
    let model_id = resolve_model(
        model_override.as_deref(),
        definition.model.as_deref(),
        caller_model.as_deref(),
        runtime.profile.default_model.as_deref(),
    )?;
    let client = runtime.provider.client(&model_id)?;
    let sandboxes = Arc::new(SandboxManager::new(&definition.sandboxes, runtime.registry.root())?);
    let output_schema = definition
        .output_schema_ref
        .as_deref()
        .map(|reference| runtime.registry.output_schema(reference))
        .transpose()?;

    let definition = Arc::new(definition);
    let mut tools = ToolRegistry::new();
    if !sandboxes.is_empty() {
        tools.register_all(sandbox_tools(Arc::clone(&sandboxes)));
    }
    if !definition.allow_workers.is_empty() {
        let delegator = Delegation {
            runtime: Arc::clone(&runtime),
            caller: Arc::clone(&definition),
            sandboxes: Arc::clone(&sandboxes),
            stack: stack.clone(),
            model_id: model_id.clone(),
        };
        tools.register(Arc::new(WorkerCallTool::new(
            Arc::new(delegator),
            definition.allow_workers.clone(),
        )));
    }
    if definition.allow_worker_creation {
        tools.register(Arc::new(WorkerCreateTool::new(Arc::new(Creation {
            runtime: Arc::clone(&runtime),
        }))));
    }

    info!(model = %model_id, path = %stack.path(), tools = ?tools.names(), "starting worker");
    if let Some(observer) = &runtime.observer {
        observer.worker_started(&definition.name, &model_id, &instructions);
    }

    let conversation = Conversation {
        label: &definition.name,
        client: client.as_ref(),
        system: &instructions,
        tools: &tools,
        approvals: &runtime.approvals,
        max_turns: definition.max_turns.unwrap_or(runtime.settings.max_turns),
        output_schema: output_schema.as_ref(),
        observer: runtime.observer.as_deref(),
    };
    let first = Message::User {
        content: stringify_input(&input),
        attachments,
    };
    conversation.run(first).await
}

/// The model/tool loop shared by worker runs and spec mode.
pub struct Conversation<'a> {
    pub label: &'a str,
    pub client: &'a dyn ModelClient,
    pub system: &'a str,
    pub tools: &'a ToolRegistry,
    pub approvals: &'a ApprovalSession,
    pub max_turns: usize,
    pub output_schema: Option<&'a Value>,
    pub observer: Option<&'a dyn RunObserver>,
}

impl Conversation<'_> {
    /// Run until the model answers without tool calls.
    pub async fn run(&self, first: Message) -> Result<WorkerRunResult> {
        let definitions = self.tools.definitions();
        let mut messages = Vec::new();
        self.push(&mut messages, first);

        for turn in 1..=self.max_turns {
            let request = ModelRequest {
                system: self.system,
                messages: &messages,
                tools: &definitions,
            };
            let response = self.client.complete(request).await?;
            debug!(worker = self.label, turn, tool_calls = response.tool_calls.len(), "model turn");

            if response.tool_calls.is_empty() {
                let text = response.text.clone().unwrap_or_default();
                self.push(&mut messages, response.into_message());
                let output = match self.output_schema {
                    Some(schema) => parse_structured_output(&text, schema)?,
                    None => Value::String(text),
                };
                return Ok(WorkerRunResult { output, messages });
            }

            let calls = response.tool_calls.clone();
            self.push(&mut messages, response.into_message());
            for call in &calls {
                let (content, is_error) = match self.tools.invoke(call, self.approvals).await? {
                    ToolOutcome::Output(value) => (value, false),
                    ToolOutcome::Declined => (json!(DECLINED_MESSAGE), true),
                    ToolOutcome::Retry(message) => {
                        warn!(worker = self.label, tool = %call.name, "tool call rejected, asking model to retry");
                        (json!(message), true)
                    }
                };
                self.push(
                    &mut messages,
                    Message::ToolResult {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        content,
                        is_error,
                    },
                );
            }
        }

        Err(Error::ModelFailure(format!(
            "worker '{}' did not produce a final answer within {} turns",
            self.label, self.max_turns
        )))
    }

    fn push(&self, messages: &mut Vec<Message>, message: Message) {
        if let Some(observer) = self.observer {
            observer.message(self.label, &message);
        }
        messages.push(message);
    }
}

/// `worker_call` backend for one calling worker.
struct Delegation {
    runtime: Arc<Runtime>,
    caller: Arc<WorkerDefinition>,
    sandboxes: Arc<SandboxManager>,
    stack: CallStack,
    model_id: String,
}

#[async_trait]
impl WorkerDelegator for Delegation {
    #[instrument(skip_all, fields(caller = %self.caller.name, target = %worker))]
    async fn call_worker(&self, worker: &str, input: Value, attachments: Vec<String>) -> Result<Value> {
        let target = self.runtime.registry.load(worker)?;
        if !self.caller.may_delegate_to(&target.name) {
            return Err(Error::PermissionDenied(format!(
                "worker '{}' may not call '{worker}'",
                self.caller.name
            )));
        }
        let stack = self.stack.push(&target.name)?;

        let paths = attachments
            .iter()
            .map(|reference| self.sandboxes.attachment_path(reference))
            .collect::<Result<Vec<_>>>()?;
        let loaded = load_attachments(&target.attachment_policy, &paths, &attachments)?;

        info!(path = %stack.path(), attachments = loaded.len(), "delegating");
        let result = execute(
            Arc::clone(&self.runtime),
            target,
            input,
            loaded,
            stack,
            None,
            Some(self.model_id.clone()),
        )
        .await
        .map_err(|err| Error::delegation(worker, err))?;
        Ok(result.output)
    }
}

/// `worker_create` backend.
struct Creation {
    runtime: Arc<Runtime>,
}

impl WorkerCreator for Creation {
    fn create_worker(&self, spec: WorkerSpec, force: bool) -> Result<WorkerDefinition> {
        self.runtime
            .registry
            .create(spec, &self.runtime.profile, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_precedence() {
        let pick = |o, w, c, p| resolve_model(o, w, c, p).expect("model");
        assert_eq!(pick(Some("cli"), Some("w"), Some("c"), Some("p")), "cli");
        assert_eq!(pick(None, Some("w"), Some("c"), Some("p")), "w");
        assert_eq!(pick(None, None, Some("c"), Some("p")), "c");
        assert_eq!(pick(None, None, None, Some("p")), "p");
        assert!(matches!(
            resolve_model(None, None, None, None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn blocking_entry_refuses_inside_runtime() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(crate::test_support::runtime(
            temp.path(),
            crate::test_support::ScriptedProvider::new(),
        ));
        let err = run_worker(runtime, WorkerRequest::new("anything", json!({}))).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
