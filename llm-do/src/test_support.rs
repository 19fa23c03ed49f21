//! Test-only helpers: scripted prompters and models, and registry fixtures.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::approval::{ApprovalPrompter, ApprovalRequest, ApprovalResponse, ApprovalSession};
use crate::core::types::{Message, ModelResponse};
use crate::error::{Error, Result};
use crate::io::registry::{WorkerDefinition, WorkerRegistry};
use crate::model::{ModelClient, ModelProvider, ModelRequest};
use crate::worker::Runtime;

/// Answers approval prompts from a fixed queue.
///
/// Clones share the queue, so a test can keep one handle and give the other
/// to an [`ApprovalSession`]. An exhausted queue answers `Quit`.
#[derive(Clone, Default)]
pub struct ScriptedPrompter {
    state: Arc<Mutex<PrompterState>>,
}

#[derive(Default)]
struct PrompterState {
    responses: VecDeque<ApprovalResponse>,
    prompted: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(responses: Vec<ApprovalResponse>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PrompterState {
                responses: responses.into(),
                prompted: Vec::new(),
            })),
        }
    }

    /// Tool names prompted for so far, in order.
    pub fn prompted(&self) -> Vec<String> {
        self.state.lock().expect("prompter lock").prompted.clone()
    }
}

impl ApprovalPrompter for ScriptedPrompter {
    fn prompt(&self, request: &ApprovalRequest<'_>) -> Result<ApprovalResponse> {
        let mut state = self.state.lock().expect("prompter lock");
        state.prompted.push(request.tool_name.to_string());
        Ok(state.responses.pop_front().unwrap_or(ApprovalResponse::Quit))
    }
}

/// What a scripted model was asked.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// A model that replays canned responses and records its requests.
pub struct ScriptedModel {
    id: String,
    attachment_types: Vec<&'static str>,
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(id: impl Into<String>, responses: Vec<ModelResponse>) -> Self {
        Self {
            id: id.into(),
            attachment_types: Vec::new(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_attachment_types(mut self, types: Vec<&'static str>) -> Self {
        self.attachment_types = types;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn attachment_types(&self) -> &[&'static str] {
        &self.attachment_types
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        self.requests.lock().expect("requests lock").push(RecordedRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|tool| tool.name.clone()).collect(),
        });
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| Error::ModelFailure(format!("{} has no scripted response left", self.id)))
    }
}

/// Hands out [`ScriptedModel`]s by model id.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    models: Arc<Mutex<BTreeMap<String, Arc<ScriptedModel>>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `responses` for `model_id` and return the model for inspection.
    pub fn script(&self, model_id: &str, responses: Vec<ModelResponse>) -> Arc<ScriptedModel> {
        self.add(ScriptedModel::new(model_id, responses))
    }

    pub fn add(&self, model: ScriptedModel) -> Arc<ScriptedModel> {
        let model = Arc::new(model);
        self.models
            .lock()
            .expect("models lock")
            .insert(model.id.clone(), Arc::clone(&model));
        model
    }
}

impl ModelProvider for ScriptedProvider {
    fn client(&self, model_id: &str) -> Result<Arc<dyn ModelClient>> {
        let models = self.models.lock().expect("models lock");
        let model = models
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("no scripted model '{model_id}'")))?;
        Ok(model)
    }
}

/// Empty registry directory.
pub fn registry_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create registry tempdir")
}

/// Persist `definition` under `root`.
pub fn write_worker(root: &Path, definition: &WorkerDefinition) -> PathBuf {
    WorkerRegistry::new(root)
        .save(definition, true)
        .expect("save worker")
}

/// Runtime over `root` that approves every call.
pub fn runtime(root: &Path, provider: ScriptedProvider) -> Runtime {
    let approvals = ApprovalSession::auto_approved(Box::new(ScriptedPrompter::default()));
    Runtime::new(WorkerRegistry::new(root), Arc::new(provider), approvals)
}

/// Runtime over `root` that prompts through `prompter`.
pub fn prompting_runtime(root: &Path, provider: ScriptedProvider, prompter: ScriptedPrompter) -> Runtime {
    let approvals = ApprovalSession::new(Box::new(prompter));
    Runtime::new(WorkerRegistry::new(root), Arc::new(provider), approvals)
}
