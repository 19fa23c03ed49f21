//! Spec mode (`llm-do do`): a free-form task run against a specification file
//! with the base toolbox.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, instrument};

use crate::core::approval::{ApprovalPrompter, ApprovalSession};
use crate::core::types::Message;
use crate::error::{Error, Result};
use crate::io::config::{CONFIG_FILE_NAME, ProjectConfig};
use crate::io::process::ShellLimits;
use crate::io::prompt::{SpecPromptInputs, render_spec_prompt};
use crate::model::{ModelClient, ModelProvider};
use crate::tools::ToolRegistry;
use crate::tools::toolbox::base_toolbox;
use crate::worker::{Conversation, RunObserver};

const RULE_WIDTH: usize = 60;

/// One `llm-do do` invocation.
#[derive(Debug, Clone)]
pub struct SpecRequest {
    pub task: String,
    /// Explicit spec file; otherwise `[workflow] spec` from the project config.
    pub spec: Option<PathBuf>,
    pub working_dir: PathBuf,
    pub model: Option<String>,
    /// Suppress the header and footer; only the response is printed.
    pub quiet: bool,
    /// Gate every tool call; otherwise the session starts auto-approved.
    pub tools_approve: bool,
}

/// Spec file for `working_dir`: the explicit one, or the configured one.
pub fn discover_spec_path(
    explicit: Option<&Path>,
    working_dir: &Path,
    config: &ProjectConfig,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(Error::NotFound(format!("spec file {}", path.display())));
        }
        return Ok(path.to_path_buf());
    }
    let Some(configured) = &config.workflow.spec else {
        return Err(Error::InvalidInput(format!(
            "no spec given: pass --spec or set [workflow] spec in {}",
            working_dir.join(CONFIG_FILE_NAME).display()
        )));
    };
    let path = working_dir.join(configured);
    if !path.is_file() {
        return Err(Error::NotFound(format!(
            "configured spec file '{}' in {}",
            configured.display(),
            working_dir.display()
        )));
    }
    Ok(path)
}

/// The model for a spec run: `--model`, else the first allowed model.
pub fn resolve_spec_model(cli_model: Option<&str>, config: &ProjectConfig) -> Result<String> {
    cli_model
        .map(str::to_string)
        .or_else(|| config.model.allowed_models.first().cloned())
        .ok_or_else(|| {
            Error::InvalidInput("no model configured: pass --model or set [model] allowed_models".to_string())
        })
}

/// Check `[model] allowed_models` and `requires_attachment_types`.
pub fn enforce_model_constraints(model_id: &str, client: &dyn ModelClient, config: &ProjectConfig) -> Result<()> {
    let allowed = &config.model.allowed_models;
    if !allowed.is_empty() && !allowed.iter().any(|name| name == model_id || name == client.model_id()) {
        let mut names = allowed.clone();
        names.sort();
        return Err(Error::PermissionDenied(format!(
            "model '{model_id}' is not permitted for this workflow; allowed models: {}",
            names.join(", ")
        )));
    }
    let supported = client.attachment_types();
    let mut missing: Vec<&str> = config
        .model
        .requires_attachment_types
        .iter()
        .map(String::as_str)
        .filter(|required| !supported.iter().any(|accepted| accepted == required))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        missing.dedup();
        return Err(Error::InvalidInput(format!(
            "model '{model_id}' is missing required attachment support: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// System prompt: the spec file contents, or the configured template rendered with them.
pub fn build_system_prompt(
    task: &str,
    spec: &str,
    spec_path: &Path,
    working_dir: &Path,
    config: &ProjectConfig,
) -> Result<String> {
    let Some(template) = &config.prompt.template else {
        return Ok(spec.to_string());
    };
    let inputs = SpecPromptInputs {
        spec,
        spec_path,
        task,
        working_dir,
        params: &config.prompt.params,
    };
    render_spec_prompt(&working_dir.join(template), &inputs)
}

/// Run `request` to completion and return the model's final response.
///
/// The header and footer go to `out` unless the request is quiet; the
/// response is always written.
#[instrument(skip_all, fields(working_dir = %request.working_dir.display()))]
pub async fn execute_spec<W: Write + Send>(
    request: &SpecRequest,
    config: &ProjectConfig,
    provider: &dyn ModelProvider,
    prompter: Box<dyn ApprovalPrompter>,
    observer: Option<&dyn RunObserver>,
    out: &mut W,
) -> Result<String> {
    let spec_path = discover_spec_path(request.spec.as_deref(), &request.working_dir, config)?;
    let spec = fs::read_to_string(&spec_path)
        .with_context(|| format!("read spec {}", spec_path.display()))?;
    let system = build_system_prompt(&request.task, &spec, &spec_path, &request.working_dir, config)?;

    let model_id = resolve_spec_model(request.model.as_deref(), config)?;
    let client = provider.client(&model_id)?;
    enforce_model_constraints(&model_id, client.as_ref(), config)?;

    if !request.quiet {
        write_header(out, request, &spec_path, config, &model_id)?;
    }

    let limits = ShellLimits {
        timeout: Duration::from_secs(config.runtime.shell_timeout_secs),
        output_limit_bytes: config.runtime.shell_output_limit_bytes,
    };
    let mut tools = ToolRegistry::new();
    tools.register_all(base_toolbox(request.working_dir.clone(), limits)?);
    let approvals = if request.tools_approve {
        ApprovalSession::new(prompter)
    } else {
        ApprovalSession::auto_approved(prompter)
    };

    info!(model = %model_id, spec = %spec_path.display(), "executing task");
    let conversation = Conversation {
        label: "do",
        client: client.as_ref(),
        system: &system,
        tools: &tools,
        approvals: &approvals,
        max_turns: config.runtime.max_turns,
        output_schema: None,
        observer,
    };
    let result = conversation.run(Message::user(request.task.as_str())).await?;
    let response = match result.output {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    };

    writeln!(out, "{response}").context("write response")?;
    if !request.quiet {
        writeln!(out, "\n{}\n\nComplete!", "=".repeat(RULE_WIDTH)).context("write footer")?;
    }
    Ok(response)
}

fn write_header<W: Write>(
    out: &mut W,
    request: &SpecRequest,
    spec_path: &Path,
    config: &ProjectConfig,
    model_id: &str,
) -> Result<()> {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut header = format!("Task: {}\nSpec: {}\n", request.task, spec_path.display());
    if let Some(template) = &config.prompt.template {
        header.push_str(&format!("Template: {}\n", template.display()));
    }
    header.push_str(&format!("Model: {model_id}\nTime: {now}\n\n{}\n", "=".repeat(RULE_WIDTH)));
    writeln!(out, "{header}").context("write header")?;
    Ok(())
}
