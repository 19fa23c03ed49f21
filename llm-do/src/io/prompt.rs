//! Instruction rendering with minijinja.
//!
//! Worker templates are rendered with the registry's `prompts/` directory as
//! the template root: `{% include %}` resolves there, and `file(path)` reads a
//! file relative to it. Neither may reach outside the root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use minijinja::{Environment, ErrorKind as TemplateErrorKind, Value as TemplateValue, context};
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::registry::{WorkerDefinition, WorkerRegistry};
use crate::io::sandbox::resolve_within;

/// Render `template` with `template_root` as its include/file() root.
pub fn render_template(template: &str, template_root: &Path, ctx: TemplateValue) -> Result<String> {
    let root = canonical_root(template_root);
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_loader(minijinja::path_loader(root.clone()));
    let file_root = root.clone();
    env.add_function("file", move |path: String| -> std::result::Result<String, minijinja::Error> {
        load_template_file(&file_root, &path).map_err(|err| {
            minijinja::Error::new(TemplateErrorKind::InvalidOperation, err.to_string())
                .with_source(err)
        })
    });
    env.render_str(template, ctx).map_err(|err| template_error(&err))
}

/// Final instructions for `definition`, rendered when they are a template.
pub fn worker_instructions(registry: &WorkerRegistry, definition: &WorkerDefinition) -> Result<String> {
    let source = registry.instruction_source(definition)?;
    if !source.is_template {
        return Ok(source.text);
    }
    let rendered = render_template(
        &source.text,
        &registry.prompts_dir(),
        context! { worker => definition.name.as_str() },
    )?;
    debug!(worker = %definition.name, chars = rendered.len(), "rendered instructions");
    Ok(rendered)
}

/// Inputs to a spec-mode system prompt template.
#[derive(Debug, Clone)]
pub struct SpecPromptInputs<'a> {
    pub spec: &'a str,
    pub spec_path: &'a Path,
    pub task: &'a str,
    pub working_dir: &'a Path,
    pub params: &'a BTreeMap<String, String>,
}

/// Render a spec-mode system prompt from the template file at `template_path`.
pub fn render_spec_prompt(template_path: &Path, inputs: &SpecPromptInputs<'_>) -> Result<String> {
    if !template_path.is_file() {
        return Err(Error::NotFound(format!(
            "prompt template {}",
            template_path.display()
        )));
    }
    let template = fs::read_to_string(template_path)
        .map_err(|err| anyhow::Error::new(err).context(format!("read {}", template_path.display())))?;
    let root = template_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    render_template(
        &template,
        &root,
        context! {
            spec => inputs.spec,
            spec_path => inputs.spec_path.display().to_string(),
            task => inputs.task,
            working_dir => inputs.working_dir.display().to_string(),
            params => inputs.params,
        },
    )
}

fn canonical_root(root: &Path) -> PathBuf {
    fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

fn load_template_file(root: &Path, path: &str) -> Result<String> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "template directory {}",
            root.display()
        )));
    }
    let target = resolve_within(root, path).map_err(|_| {
        Error::PermissionDenied(format!("file() path escapes template root: {path}"))
    })?;
    if !target.is_file() {
        return Err(Error::NotFound(format!("template file {path}")));
    }
    fs::read_to_string(&target)
        .map_err(|err| anyhow::Error::new(err).context(format!("read {}", target.display())).into())
}

/// Recover a classified error raised inside `file()`; anything else is a
/// template problem.
fn template_error(err: &minijinja::Error) -> Error {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(inner) = current.downcast_ref::<Error>() {
            return inner.shallow_clone();
        }
        source = current.source();
    }
    Error::InvalidInput(format!("template error: {err:#}"))
}
