//! `sandbox_list`, `sandbox_read_text` and `sandbox_write_text`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, parse_args};
use crate::error::Result;
use crate::io::sandbox::{DEFAULT_LIST_PATTERN, DEFAULT_MAX_CHARS, SandboxManager};

/// The three sandbox tools over one run's sandboxes.
pub fn sandbox_tools(sandboxes: Arc<SandboxManager>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SandboxListTool {
            sandboxes: Arc::clone(&sandboxes),
        }),
        Arc::new(SandboxReadTextTool {
            sandboxes: Arc::clone(&sandboxes),
        }),
        Arc::new(SandboxWriteTextTool { sandboxes }),
    ]
}

fn sandbox_names(sandboxes: &SandboxManager) -> Value {
    Value::Array(sandboxes.names().map(|name| json!(name)).collect())
}

pub struct SandboxListTool {
    sandboxes: Arc<SandboxManager>,
}

#[derive(Deserialize)]
struct ListArgs {
    sandbox: String,
    #[serde(default)]
    pattern: Option<String>,
}

#[async_trait]
impl Tool for SandboxListTool {
    fn name(&self) -> &str {
        "sandbox_list"
    }

    fn description(&self) -> &str {
        "List files in a sandbox matching a glob pattern (default '**/*'). Returns sandbox-relative paths."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sandbox": {"type": "string", "enum": sandbox_names(&self.sandboxes)},
                "pattern": {"type": "string", "description": "Glob such as '**/*.png'."}
            },
            "required": ["sandbox"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: ListArgs = parse_args(self.name(), args)?;
        let pattern = args.pattern.as_deref().unwrap_or(DEFAULT_LIST_PATTERN);
        let paths = self.sandboxes.list(&args.sandbox, pattern)?;
        Ok(json!(paths))
    }
}

pub struct SandboxReadTextTool {
    sandboxes: Arc<SandboxManager>,
}

#[derive(Deserialize)]
struct ReadArgs {
    sandbox: String,
    path: String,
    #[serde(default)]
    max_chars: Option<usize>,
}

#[async_trait]
impl Tool for SandboxReadTextTool {
    fn name(&self) -> &str {
        "sandbox_read_text"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from a sandbox."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sandbox": {"type": "string", "enum": sandbox_names(&self.sandboxes)},
                "path": {"type": "string"},
                "max_chars": {"type": "integer", "minimum": 1}
            },
            "required": ["sandbox", "path"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: ReadArgs = parse_args(self.name(), args)?;
        let text = self.sandboxes.read_text(
            &args.sandbox,
            &args.path,
            args.max_chars.unwrap_or(DEFAULT_MAX_CHARS),
        )?;
        Ok(Value::String(text))
    }
}

pub struct SandboxWriteTextTool {
    sandboxes: Arc<SandboxManager>,
}

#[derive(Deserialize)]
struct WriteArgs {
    sandbox: String,
    path: String,
    content: String,
}

#[async_trait]
impl Tool for SandboxWriteTextTool {
    fn name(&self) -> &str {
        "sandbox_write_text"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file into a writable sandbox, creating directories and overwriting."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sandbox": {"type": "string", "enum": sandbox_names(&self.sandboxes)},
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["sandbox", "path", "content"],
            "additionalProperties": false
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: WriteArgs = parse_args(self.name(), args)?;
        let message = self
            .sandboxes
            .write_text(&args.sandbox, &args.path, &args.content)?;
        Ok(Value::String(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::approval::{ApprovalResponse, ApprovalSession};
    use crate::core::types::ToolCall;
    use crate::error::Error;
    use crate::io::sandbox::{SandboxConfig, SandboxMode};
    use crate::test_support::ScriptedPrompter;
    use crate::tools::{ToolOutcome, ToolRegistry};
    use std::collections::BTreeMap;

    fn setup(temp: &std::path::Path) -> ToolRegistry {
        let mut configs = BTreeMap::new();
        configs.insert("input".to_string(), SandboxConfig::new("input", SandboxMode::ReadOnly));
        configs.insert("out".to_string(), SandboxConfig::new("out", SandboxMode::ReadWrite));
        let sandboxes = SandboxManager::new(&configs, temp).expect("sandboxes");
        let mut registry = ToolRegistry::new();
        registry.register_all(sandbox_tools(Arc::new(sandboxes)));
        registry
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: format!("{name}-1"),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn list_only_offers_configured_sandboxes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = setup(temp.path());
        let approvals = ApprovalSession::new(Box::new(ScriptedPrompter::new(Vec::new())));

        let outcome = registry
            .invoke(&call("sandbox_list", json!({"sandbox": "elsewhere"})), &approvals)
            .await
            .expect("invoke");
        assert!(matches!(outcome, ToolOutcome::Retry(_)));
    }

    #[tokio::test]
    async fn declined_write_leaves_disk_untouched_and_next_call_prompts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = setup(temp.path());
        let prompter = ScriptedPrompter::new(vec![ApprovalResponse::Decline, ApprovalResponse::Accept]);
        let approvals = ApprovalSession::new(Box::new(prompter.clone()));
        let write = call(
            "sandbox_write_text",
            json!({"sandbox": "out", "path": "note.md", "content": "hello"}),
        );

        let first = registry.invoke(&write, &approvals).await.expect("first");
        assert_eq!(first, ToolOutcome::Declined);
        assert!(!temp.path().join("out/note.md").exists());

        let second = registry.invoke(&write, &approvals).await.expect("second");
        assert_eq!(second, ToolOutcome::Output(json!("wrote 5 chars to out:note.md")));
        assert_eq!(prompter.prompted().len(), 2);
    }

    #[tokio::test]
    async fn reads_are_not_gated_and_writes_to_ro_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = setup(temp.path());
        std::fs::write(temp.path().join("input/brief.txt"), "brief").expect("brief");
        let approvals = ApprovalSession::auto_approved(Box::new(ScriptedPrompter::new(Vec::new())));

        let read = registry
            .invoke(
                &call("sandbox_read_text", json!({"sandbox": "input", "path": "brief.txt"})),
                &approvals,
            )
            .await
            .expect("read");
        assert_eq!(read, ToolOutcome::Output(json!("brief")));

        let err = registry
            .invoke(
                &call(
                    "sandbox_write_text",
                    json!({"sandbox": "input", "path": "x.txt", "content": "x"}),
                ),
                &approvals,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}
