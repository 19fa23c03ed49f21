//! Base toolbox for spec mode: `run_bash`, `read_file`, `write_file`.
//!
//! All three are rooted at the working directory. Failures are reported to
//! the model as text so it can adjust, not raised as run errors.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{Tool, parse_args};
use crate::error::{Error, Result};
use crate::io::process::{ShellLimits, run_shell};
use crate::io::sandbox::resolve_within;

/// Build the base toolbox rooted at `working_dir` (canonicalized here).
pub fn base_toolbox(working_dir: PathBuf, limits: ShellLimits) -> Result<Vec<Arc<dyn Tool>>> {
    let root = fs::canonicalize(&working_dir)
        .with_context(|| format!("canonicalize working directory {}", working_dir.display()))?;
    Ok(vec![
        Arc::new(RunBashTool {
            root: root.clone(),
            limits,
        }),
        Arc::new(ReadFileTool { root: root.clone() }),
        Arc::new(WriteFileTool { root }),
    ])
}

pub struct RunBashTool {
    root: PathBuf,
    limits: ShellLimits,
}

#[derive(Deserialize)]
struct BashArgs {
    command: String,
}

#[async_trait]
impl Tool for RunBashTool {
    fn name(&self) -> &str {
        "run_bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return its output. \
         Use for git operations, finding files, and file metadata."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(tool = "run_bash"))]
    async fn call(&self, args: Value) -> Result<Value> {
        let args: BashArgs = parse_args(self.name(), args)?;
        let root = self.root.clone();
        let limits = self.limits;
        let command = args.command;
        debug!(%command, "running shell command");
        let output = tokio::task::spawn_blocking(move || run_shell(&command, &root, limits))
            .await
            .map_err(|err| Error::Other(anyhow::anyhow!("shell task failed: {err}")))??;

        if output.timed_out {
            return Ok(json!(format!(
                "Error: command timed out after {}s",
                limits.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            return Ok(json!(format!(
                "Error (exit {}): {}",
                output.exit_label(),
                output.stderr_text()
            )));
        }
        let stdout = output.stdout_text();
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            Ok(json!("(command succeeded, no output)"))
        } else {
            Ok(json!(trimmed))
        }
    }
}

pub struct ReadFileTool {
    root: PathBuf,
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file relative to the working directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: ReadArgs = parse_args(self.name(), args)?;
        let result = resolve_within(&self.root, &args.path).and_then(|path| {
            fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))
                .map_err(Error::from)
        });
        Ok(match result {
            Ok(text) => json!(text),
            Err(err) => json!(format!("Error reading {}: {err:#}", args.path)),
        })
    }
}

pub struct WriteFileTool {
    root: PathBuf,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a text file relative to the working directory, creating parent directories."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: WriteArgs = parse_args(self.name(), args)?;
        let result = resolve_within(&self.root, &args.path).and_then(|path| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            fs::write(&path, &args.content)
                .with_context(|| format!("write {}", path.display()))
                .map_err(Error::from)
        });
        Ok(match result {
            Ok(()) => json!(format!(
                "Written {} characters to {}",
                args.content.chars().count(),
                args.path
            )),
            Err(err) => json!(format!("Error writing {}: {err:#}", args.path)),
        })
    }
}
