//! Project configuration stored in `llm-do.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::call_stack::DEFAULT_MAX_DEPTH;

pub const CONFIG_FILE_NAME: &str = "llm-do.toml";

/// Project configuration (TOML).
///
/// Every section is optional. A missing file yields the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub workflow: WorkflowConfig,
    pub prompt: PromptConfig,
    pub model: ModelConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Spec file used by `llm-do do` when `--spec` is not given.
    pub spec: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Template (path relative to the project) for the spec-mode system prompt.
    pub template: Option<PathBuf>,
    /// Extra values exposed to the template.
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// If non-empty, only these model ids may be used in spec mode.
    pub allowed_models: Vec<String>,
    /// Attachment media types (`image/png`, ...) the chosen model must accept.
    pub requires_attachment_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum delegation depth below the entry worker.
    pub max_depth: usize,

    /// Default model round trips per worker run.
    pub max_turns: usize,

    /// Wall-clock limit for one `run_bash` call.
    pub shell_timeout_secs: u64,

    /// Truncate `run_bash` stdout/stderr beyond this many bytes.
    pub shell_output_limit_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_turns: 20,
            shell_timeout_secs: 120,
            shell_output_limit_bytes: 100_000,
        }
    }
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_turns == 0 {
            return Err(anyhow!("runtime.max_turns must be > 0"));
        }
        if self.runtime.shell_timeout_secs == 0 {
            return Err(anyhow!("runtime.shell_timeout_secs must be > 0"));
        }
        if self.runtime.shell_output_limit_bytes == 0 {
            return Err(anyhow!("runtime.shell_output_limit_bytes must be > 0"));
        }
        if self
            .model
            .allowed_models
            .iter()
            .any(|model| model.trim().is_empty())
        {
            return Err(anyhow!("model.allowed_models must not contain empty entries"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ProjectConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        let cfg = ProjectConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProjectConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Load `llm-do.toml` from `dir`.
pub fn load_project_config(dir: &Path) -> Result<ProjectConfig> {
    load_config(&dir.join(CONFIG_FILE_NAME))
}
