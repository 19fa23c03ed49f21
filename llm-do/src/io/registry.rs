//! Worker definitions persisted as YAML under a registry root.
//!
//! Lookup order for a worker named `foo`:
//! `<root>/foo.yaml`, `<root>/foo.yml`, `<root>/workers/foo.yaml`.
//! New workers are written to `<root>/foo.yaml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::io::attachments::AttachmentPolicy;
use crate::io::sandbox::SandboxConfig;

pub const PROMPTS_DIR: &str = "prompts";
pub const SCHEMAS_DIR: &str = "schemas";
const PROMPT_EXTENSIONS: [&str; 4] = ["jinja2", "j2", "txt", "md"];

static WORKER_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("worker name regex should be valid")
});

/// A persisted, named worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Inline instructions. When absent, `prompts/<name>.*` is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema_ref: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sandboxes: BTreeMap<String, SandboxConfig>,
    pub attachment_policy: AttachmentPolicy,
    /// Workers this one may delegate to. `"*"` allows any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_workers: Vec<String>,
    pub allow_worker_creation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,
}

impl WorkerDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Some(instructions.into()),
            ..Self::default()
        }
    }

    pub fn may_delegate_to(&self, worker: &str) -> bool {
        self.allow_workers
            .iter()
            .any(|allowed| allowed == "*" || allowed == worker)
    }

    pub fn validate(&self) -> Result<()> {
        validate_worker_name(&self.name)?;
        self.attachment_policy.check_config()?;
        if self.max_turns == Some(0) {
            return Err(Error::InvalidInput(format!(
                "worker '{}': max_turns must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Defaults applied to workers created at runtime, and the fallback model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerCreationProfile {
    pub default_model: Option<String>,
    pub default_sandboxes: BTreeMap<String, SandboxConfig>,
    pub default_attachment_policy: AttachmentPolicy,
}

impl WorkerCreationProfile {
    /// Parse a profile from inline JSON (`{...}`) or from a JSON file path.
    pub fn load(source: &str) -> Result<Self> {
        let text = if source.trim_start().starts_with('{') {
            source.to_string()
        } else {
            let path = Path::new(source);
            if !path.is_file() {
                return Err(Error::NotFound(format!("profile {}", path.display())));
            }
            fs::read_to_string(path).with_context(|| format!("read profile {}", path.display()))?
        };
        let profile: Self = serde_json::from_str(&text)
            .map_err(|err| Error::InvalidInput(format!("invalid profile: {err}")))?;
        profile.default_attachment_policy.check_config()?;
        Ok(profile)
    }
}

/// Unrendered worker instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSource {
    pub text: String,
    pub is_template: bool,
}

/// Arguments for creating a worker at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    pub instructions: String,
    pub description: Option<String>,
    pub model: Option<String>,
    pub output_schema_ref: Option<String>,
}

pub fn validate_worker_name(name: &str) -> Result<()> {
    if WORKER_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid worker name '{name}': use letters, digits, '_' or '-'"
        )))
    }
}

/// Filesystem-backed store of worker definitions.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    root: PathBuf,
}

impl WorkerRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join(PROMPTS_DIR)
    }

    /// Path of the definition file for `name`, if one exists.
    pub fn find(&self, name: &str) -> Result<PathBuf> {
        validate_worker_name(name)?;
        let candidates = [
            self.root.join(format!("{name}.yaml")),
            self.root.join(format!("{name}.yml")),
            self.root.join("workers").join(format!("{name}.yaml")),
        ];
        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "worker '{name}' in registry {}",
                    self.root.display()
                ))
            })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_ok()
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn load(&self, name: &str) -> Result<WorkerDefinition> {
        let path = self.find(name)?;
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut definition: WorkerDefinition = serde_yaml::from_str(&contents).map_err(|err| {
            Error::InvalidInput(format!("invalid worker definition {}: {err}", path.display()))
        })?;
        if definition.name.is_empty() {
            definition.name = name.to_string();
        }
        definition.validate()?;
        debug!(path = %path.display(), "loaded worker definition");
        Ok(definition)
    }

    /// Persist `definition`. Fails if it already exists and `force` is false.
    pub fn save(&self, definition: &WorkerDefinition, force: bool) -> Result<PathBuf> {
        definition.validate()?;
        if !force && self.exists(&definition.name) {
            return Err(Error::InvalidInput(format!(
                "worker '{}' already exists (use force to overwrite)",
                definition.name
            )));
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create registry {}", self.root.display()))?;
        let path = match self.find(&definition.name) {
            Ok(existing) => existing,
            Err(_) => self.root.join(format!("{}.yaml", definition.name)),
        };
        let yaml = serde_yaml::to_string(definition)
            .with_context(|| format!("serialize worker '{}'", definition.name))?;
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml)
            .with_context(|| format!("write temp definition {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace definition {}", path.display()))?;
        info!(worker = %definition.name, path = %path.display(), "saved worker definition");
        Ok(path)
    }

    /// Create and persist a worker from `spec`, filling gaps from `profile`.
    pub fn create(
        &self,
        spec: WorkerSpec,
        profile: &WorkerCreationProfile,
        force: bool,
    ) -> Result<WorkerDefinition> {
        let definition = WorkerDefinition {
            name: spec.name,
            description: spec.description,
            instructions: Some(spec.instructions),
            model: spec.model.or_else(|| profile.default_model.clone()),
            output_schema_ref: spec.output_schema_ref,
            sandboxes: profile.default_sandboxes.clone(),
            attachment_policy: profile.default_attachment_policy.clone(),
            ..WorkerDefinition::default()
        };
        self.save(&definition, force)?;
        Ok(definition)
    }

    /// Instruction text for a definition: inline, or `prompts/<name>.*`.
    ///
    /// Inline text and `.jinja2`/`.j2` files are templates; `.txt` and `.md`
    /// files are used verbatim.
    pub fn instruction_source(&self, definition: &WorkerDefinition) -> Result<InstructionSource> {
        if let Some(text) = &definition.instructions {
            return Ok(InstructionSource {
                text: text.clone(),
                is_template: true,
            });
        }
        let prompts = self.prompts_dir();
        for ext in PROMPT_EXTENSIONS {
            let path = prompts.join(format!("{}.{ext}", definition.name));
            if path.is_file() {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?;
                return Ok(InstructionSource {
                    text,
                    is_template: matches!(ext, "jinja2" | "j2"),
                });
            }
        }
        Err(Error::NotFound(format!(
            "instructions for worker '{}' (inline or {}/{}.{{{}}})",
            definition.name,
            prompts.display(),
            definition.name,
            PROMPT_EXTENSIONS.join(",")
        )))
    }

    /// Load the output schema named by `reference`.
    ///
    /// References ending in `.json` are paths relative to the registry root;
    /// bare names resolve to `schemas/<name>.json`.
    pub fn output_schema(&self, reference: &str) -> Result<Value> {
        let path = if reference.ends_with(".json") {
            self.root.join(reference)
        } else {
            self.root.join(SCHEMAS_DIR).join(format!("{reference}.json"))
        };
        if !path.is_file() {
            return Err(Error::NotFound(format!("output schema {}", path.display())));
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).map_err(|err| {
            Error::InvalidInput(format!("invalid output schema {}: {err}", path.display()))
        })
    }
}
