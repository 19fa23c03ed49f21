//! Approval gate behaviour across a worker run and its delegations.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use llm_do::core::approval::ApprovalResponse;
use llm_do::core::types::{Message, ModelResponse};
use llm_do::io::registry::WorkerDefinition;
use llm_do::io::sandbox::{SandboxConfig, SandboxMode};
use llm_do::test_support::{ScriptedPrompter, ScriptedProvider, prompting_runtime, registry_dir, write_worker};
use llm_do::tools::DECLINED_MESSAGE;
use llm_do::{Error, WorkerRequest, run_worker};

fn writer_fixture(root: &Path) {
    let mut sandboxes = BTreeMap::new();
    sandboxes.insert("out".to_string(), SandboxConfig::new("out", SandboxMode::ReadWrite));
    write_worker(
        root,
        &WorkerDefinition {
            model: Some("test:writer".to_string()),
            sandboxes,
            allow_workers: vec!["helper".to_string()],
            ..WorkerDefinition::new("writer", "Write notes.")
        },
    );
    write_worker(
        root,
        &WorkerDefinition {
            model: Some("test:helper".to_string()),
            ..WorkerDefinition::new("helper", "Help.")
        },
    );
}

fn write_call(id: &str, path: &str) -> ModelResponse {
    ModelResponse::tool_call(
        id,
        "sandbox_write_text",
        json!({"sandbox": "out", "path": path, "content": "note"}),
    )
}

#[test]
fn decline_skips_one_call_and_the_next_still_prompts() {
    let temp = registry_dir();
    writer_fixture(temp.path());
    let provider = ScriptedProvider::new();
    let writer = provider.script(
        "test:writer",
        vec![write_call("c1", "first.md"), write_call("c2", "second.md"), ModelResponse::text("done")],
    );
    let prompter = ScriptedPrompter::new(vec![ApprovalResponse::Decline, ApprovalResponse::Accept]);

    let result = run_worker(
        Arc::new(prompting_runtime(temp.path(), provider, prompter.clone())),
        WorkerRequest::new("writer", json!({})),
    )
    .expect("run");

    assert_eq!(result.output, json!("done"));
    assert!(!temp.path().join("out/first.md").exists());
    assert!(temp.path().join("out/second.md").exists());
    assert_eq!(prompter.prompted(), vec!["sandbox_write_text", "sandbox_write_text"]);

    let Some(Message::ToolResult {
        content, is_error, ..
    }) = writer.requests()[1].messages.last().cloned()
    else {
        panic!("expected tool result");
    };
    assert_eq!(content, json!(DECLINED_MESSAGE));
    assert!(is_error);
}

#[test]
fn always_covers_later_calls_including_delegations() {
    let temp = registry_dir();
    writer_fixture(temp.path());
    let provider = ScriptedProvider::new();
    provider.script(
        "test:writer",
        vec![
            write_call("c1", "a.md"),
            ModelResponse::tool_call("c2", "worker_call", json!({"worker": "helper"})),
            write_call("c3", "b.md"),
            ModelResponse::text("done"),
        ],
    );
    provider.script("test:helper", vec![ModelResponse::text("helped")]);
    let prompter = ScriptedPrompter::new(vec![ApprovalResponse::AcceptAll]);

    run_worker(
        Arc::new(prompting_runtime(temp.path(), provider, prompter.clone())),
        WorkerRequest::new("writer", json!({})),
    )
    .expect("run");

    assert_eq!(prompter.prompted(), vec!["sandbox_write_text"]);
    assert!(temp.path().join("out/a.md").exists());
    assert!(temp.path().join("out/b.md").exists());
}

#[test]
fn quit_aborts_the_run_without_writing() {
    let temp = registry_dir();
    writer_fixture(temp.path());
    let provider = ScriptedProvider::new();
    provider.script("test:writer", vec![write_call("c1", "a.md"), ModelResponse::text("unreachable")]);
    let prompter = ScriptedPrompter::new(vec![ApprovalResponse::Quit]);

    let err = run_worker(
        Arc::new(prompting_runtime(temp.path(), provider, prompter)),
        WorkerRequest::new("writer", json!({})),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)), "{err}");
    assert!(!temp.path().join("out/a.md").exists());
}

#[test]
fn read_only_tools_never_prompt() {
    let temp = registry_dir();
    writer_fixture(temp.path());
    fs::create_dir_all(temp.path().join("out")).expect("out");
    fs::write(temp.path().join("out/existing.md"), "hello").expect("existing");
    let provider = ScriptedProvider::new();
    provider.script(
        "test:writer",
        vec![
            ModelResponse::tool_call("c1", "sandbox_list", json!({"sandbox": "out"})),
            ModelResponse::tool_call("c2", "sandbox_read_text", json!({"sandbox": "out", "path": "existing.md"})),
            ModelResponse::text("read it"),
        ],
    );
    let prompter = ScriptedPrompter::new(Vec::new());

    let result = run_worker(
        Arc::new(prompting_runtime(temp.path(), provider, prompter.clone())),
        WorkerRequest::new("writer", json!({})),
    )
    .expect("run");

    assert_eq!(result.output, json!("read it"));
    assert!(prompter.prompted().is_empty());
}
