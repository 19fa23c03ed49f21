//! End-to-end worker runs with nested delegation.
//!
//! Every run uses scripted models, so the transcript each worker sees can be
//! asserted exactly. The orchestrator scenario exercises sandbox listing,
//! delegation with a sandbox attachment, and writing the returned plan.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use llm_do::core::types::{Message, ModelResponse};
use llm_do::io::attachments::AttachmentPolicy;
use llm_do::io::registry::{WorkerCreationProfile, WorkerDefinition, WorkerRegistry};
use llm_do::io::sandbox::{SandboxConfig, SandboxMode};
use llm_do::test_support::{ScriptedModel, ScriptedProvider, registry_dir, runtime, write_worker};
use llm_do::{Error, ErrorKind, RuntimeSettings, WorkerRequest, run_worker, run_worker_async};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nwhiteboard";
const PLAN: &str = "# White board plan\n- sketch\n- review";

fn orchestrator_fixture(root: &Path) {
    let mut sandboxes = BTreeMap::new();
    sandboxes.insert("input".to_string(), SandboxConfig::new("input", SandboxMode::ReadOnly));
    sandboxes.insert("plans".to_string(), SandboxConfig::new("plans", SandboxMode::ReadWrite));
    write_worker(
        root,
        &WorkerDefinition {
            model: Some("test:orchestrator".to_string()),
            sandboxes,
            allow_workers: vec!["locked_planner".to_string()],
            ..WorkerDefinition::new("orchestrator", "Turn every board photo into a plan.")
        },
    );
    write_worker(
        root,
        &WorkerDefinition {
            model: Some("test:planner".to_string()),
            attachment_policy: AttachmentPolicy {
                max_attachments: 1,
                allowed_suffixes: vec![".PNG".to_string()],
                ..AttachmentPolicy::default()
            },
            ..WorkerDefinition::new("locked_planner", "Write a plan for the attached board.")
        },
    );
    fs::create_dir_all(root.join("input")).expect("input dir");
    fs::write(root.join("input/white_board_plan.png"), PNG_BYTES).expect("png");
}

fn orchestrator_script(provider: &ScriptedProvider) -> Arc<ScriptedModel> {
    provider.script(
        "test:orchestrator",
        vec![
            ModelResponse::tool_call("c1", "sandbox_list", json!({"sandbox": "input", "pattern": "**/*.png"})),
            ModelResponse::tool_call(
                "c2",
                "worker_call",
                json!({
                    "worker": "locked_planner",
                    "input_data": {"board": "white_board_plan"},
                    "attachments": ["input/white_board_plan.png"]
                }),
            ),
            ModelResponse::tool_call(
                "c3",
                "sandbox_write_text",
                json!({"sandbox": "plans", "path": "white_board_plan.md", "content": PLAN}),
            ),
            ModelResponse::text("Wrote plans/white_board_plan.md"),
        ],
    )
}

fn last_tool_result(messages: &[Message]) -> (Value, bool) {
    match messages.last() {
        Some(Message::ToolResult {
            content, is_error, ..
        }) => (content.clone(), *is_error),
        other => panic!("expected tool result, got {other:?}"),
    }
}

fn assert_orchestration(root: &Path, output: &Value) {
    assert_eq!(output, &json!("Wrote plans/white_board_plan.md"));
    assert_eq!(
        fs::read_to_string(root.join("plans/white_board_plan.md")).expect("plan"),
        PLAN
    );
}

#[test]
fn nested_delegation_with_attachment_completes_blocking() {
    let temp = registry_dir();
    orchestrator_fixture(temp.path());
    let provider = ScriptedProvider::new();
    orchestrator_script(&provider);
    let planner = provider.script("test:planner", vec![ModelResponse::text(PLAN)]);

    let result = run_worker(
        Arc::new(runtime(temp.path(), provider.clone())),
        WorkerRequest::new("orchestrator", json!("plan the boards")),
    )
    .expect("run");

    assert_orchestration(temp.path(), &result.output);

    let requests = planner.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system, "Write a plan for the attached board.");
    assert!(requests[0].tools.is_empty());
    let Message::User {
        content,
        attachments,
    } = &requests[0].messages[0]
    else {
        panic!("expected user message");
    };
    assert_eq!(content, "{\n  \"board\": \"white_board_plan\"\n}");
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].name, "input/white_board_plan.png");
    assert_eq!(attachments[0].media_type, "image/png");
    assert_eq!(attachments[0].data, PNG_BYTES);
}

#[tokio::test]
async fn nested_delegation_with_attachment_completes_async() {
    let temp = registry_dir();
    orchestrator_fixture(temp.path());
    let provider = ScriptedProvider::new();
    orchestrator_script(&provider);
    provider.script("test:planner", vec![ModelResponse::text(PLAN)]);

    let result = run_worker_async(
        Arc::new(runtime(temp.path(), provider.clone())),
        WorkerRequest::new("orchestrator", json!("plan the boards")),
    )
    .await
    .expect("run");

    assert_orchestration(temp.path(), &result.output);
    // user, then (assistant, tool result) per tool turn, then the final answer
    assert_eq!(result.messages.len(), 8);
}

#[tokio::test]
async fn orchestrator_sees_listing_and_delegated_output() {
    let temp = registry_dir();
    orchestrator_fixture(temp.path());
    fs::write(temp.path().join("input/notes.txt"), "not a board").expect("notes");
    let provider = ScriptedProvider::new();
    let orchestrator = orchestrator_script(&provider);
    provider.script("test:planner", vec![ModelResponse::text(PLAN)]);

    run_worker_async(
        Arc::new(runtime(temp.path(), provider.clone())),
        WorkerRequest::new("orchestrator", json!("plan the boards")),
    )
    .await
    .expect("run");

    let requests = orchestrator.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(
        requests[0].tools,
        vec!["sandbox_list", "sandbox_read_text", "sandbox_write_text", "worker_call"]
    );
    assert_eq!(last_tool_result(&requests[1].messages), (json!(["white_board_plan.png"]), false));
    assert_eq!(last_tool_result(&requests[2].messages), (json!(PLAN), false));
    assert_eq!(
        last_tool_result(&requests[3].messages),
        (json!("wrote 36 chars to plans:white_board_plan.md"), false)
    );
}

#[test]
fn depth_guard_stops_runaway_recursion() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:loop".to_string()),
            allow_workers: vec!["looper".to_string()],
            ..WorkerDefinition::new("looper", "Delegate to yourself.")
        },
    );
    let provider = ScriptedProvider::new();
    let call = || ModelResponse::tool_call("c", "worker_call", json!({"worker": "looper"}));
    provider.script("test:loop", vec![call(), call(), call()]);
    let settings = RuntimeSettings {
        max_depth: 1,
        ..RuntimeSettings::default()
    };

    let err = run_worker(
        Arc::new(runtime(temp.path(), provider).with_settings(settings)),
        WorkerRequest::new("looper", json!({})),
    )
    .unwrap_err();

    assert!(matches!(&err, Error::Delegation { worker, .. } if worker == "looper"));
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(err.to_string().contains("depth limit 1"));
}

#[test]
fn unknown_delegate_is_not_found() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:any".to_string()),
            allow_workers: vec!["*".to_string()],
            ..WorkerDefinition::new("dispatcher", "Route work.")
        },
    );
    let provider = ScriptedProvider::new();
    provider.script(
        "test:any",
        vec![ModelResponse::tool_call("c", "worker_call", json!({"worker": "ghost"}))],
    );

    let err = run_worker(
        Arc::new(runtime(temp.path(), provider)),
        WorkerRequest::new("dispatcher", json!({})),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[test]
fn delegate_outside_allow_list_is_sent_back_to_model() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:caller".to_string()),
            allow_workers: vec!["planner".to_string()],
            ..WorkerDefinition::new("caller", "Delegate.")
        },
    );
    let provider = ScriptedProvider::new();
    let caller = provider.script(
        "test:caller",
        vec![
            ModelResponse::tool_call("c", "worker_call", json!({"worker": "intruder"})),
            ModelResponse::text("gave up"),
        ],
    );

    let result = run_worker(
        Arc::new(runtime(temp.path(), provider)),
        WorkerRequest::new("caller", json!({})),
    )
    .expect("run");

    assert_eq!(result.output, json!("gave up"));
    let (content, is_error) = last_tool_result(&caller.requests()[1].messages);
    assert!(is_error);
    assert!(content.as_str().expect("text").contains("Invalid arguments for 'worker_call'"));
}

#[test]
fn delegated_failure_propagates_as_one_value() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:caller".to_string()),
            allow_workers: vec!["planner".to_string()],
            ..WorkerDefinition::new("caller", "Delegate.")
        },
    );
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:broken".to_string()),
            ..WorkerDefinition::new("planner", "Plan.")
        },
    );
    let provider = ScriptedProvider::new();
    provider.script(
        "test:caller",
        vec![ModelResponse::tool_call("c", "worker_call", json!({"worker": "planner"}))],
    );
    provider.script("test:broken", Vec::new());

    let err = run_worker(
        Arc::new(runtime(temp.path(), provider)),
        WorkerRequest::new("caller", json!({})),
    )
    .unwrap_err();

    let Error::Delegation { worker, source } = &err else {
        panic!("expected delegation failure, got {err}");
    };
    assert_eq!(worker, "planner");
    assert!(matches!(**source, Error::ModelFailure(_)));
}

#[test]
fn delegate_inherits_caller_model() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            allow_workers: vec!["helper".to_string()],
            ..WorkerDefinition::new("caller", "Delegate.")
        },
    );
    write_worker(temp.path(), &WorkerDefinition::new("helper", "Help."));
    let provider = ScriptedProvider::new();
    let shared = provider.script(
        "test:cli",
        vec![
            ModelResponse::tool_call("c", "worker_call", json!({"worker": "helper", "input_data": "hi"})),
            ModelResponse::text("helped"),
            ModelResponse::text("done"),
        ],
    );

    let result = run_worker(
        Arc::new(runtime(temp.path(), provider).with_cli_model(Some("test:cli".to_string()))),
        WorkerRequest::new("caller", json!({})),
    )
    .expect("run");

    assert_eq!(result.output, json!("done"));
    let systems: Vec<String> = shared.requests().into_iter().map(|r| r.system).collect();
    assert_eq!(systems, vec!["Delegate.", "Help.", "Delegate."]);
}

#[test]
fn structured_output_is_validated() {
    let temp = registry_dir();
    fs::create_dir_all(temp.path().join("schemas")).expect("schemas");
    fs::write(
        temp.path().join("schemas/plan.json"),
        r#"{"type": "object", "required": ["title"], "properties": {"title": {"type": "string"}}}"#,
    )
    .expect("schema");
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:planner".to_string()),
            output_schema_ref: Some("plan".to_string()),
            ..WorkerDefinition::new("planner", "Return a plan as JSON.")
        },
    );

    let provider = ScriptedProvider::new();
    provider.script(
        "test:planner",
        vec![ModelResponse::text("```json\n{\"title\": \"Boards\"}\n```")],
    );
    let result = run_worker(
        Arc::new(runtime(temp.path(), provider)),
        WorkerRequest::new("planner", json!({})),
    )
    .expect("run");
    assert_eq!(result.output, json!({"title": "Boards"}));

    let provider = ScriptedProvider::new();
    provider.script("test:planner", vec![ModelResponse::text(r#"{"title": 3}"#)]);
    let err = run_worker(
        Arc::new(runtime(temp.path(), provider)),
        WorkerRequest::new("planner", json!({})),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "{err}");
}

#[test]
fn worker_creation_applies_profile_defaults() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:creator".to_string()),
            allow_worker_creation: true,
            ..WorkerDefinition::new("creator", "Create helpers.")
        },
    );
    let provider = ScriptedProvider::new();
    provider.script(
        "test:creator",
        vec![
            ModelResponse::tool_call(
                "c",
                "worker_create",
                json!({"name": "summarizer", "instructions": "Summarize the input."}),
            ),
            ModelResponse::text("created"),
        ],
    );
    let profile = WorkerCreationProfile {
        default_model: Some("anthropic:claude-haiku-4-5".to_string()),
        ..WorkerCreationProfile::default()
    };

    run_worker(
        Arc::new(runtime(temp.path(), provider).with_profile(profile)),
        WorkerRequest::new("creator", json!({})),
    )
    .expect("run");

    let created = WorkerRegistry::new(temp.path()).load("summarizer").expect("created");
    assert_eq!(created.instructions.as_deref(), Some("Summarize the input."));
    assert_eq!(created.model.as_deref(), Some("anthropic:claude-haiku-4-5"));
}

#[test]
fn entry_attachments_follow_worker_policy() {
    let temp = registry_dir();
    write_worker(
        temp.path(),
        &WorkerDefinition {
            model: Some("test:reader".to_string()),
            attachment_policy: AttachmentPolicy {
                max_attachments: 1,
                ..AttachmentPolicy::default()
            },
            ..WorkerDefinition::new("reader", "Read the files.")
        },
    );
    let a = temp.path().join("a.txt");
    let b = temp.path().join("b.txt");
    fs::write(&a, "a").expect("a");
    fs::write(&b, "b").expect("b");

    let mut request = WorkerRequest::new("reader", json!({}));
    request.attachments = vec![a, b];
    let err = run_worker(Arc::new(runtime(temp.path(), ScriptedProvider::new())), request).unwrap_err();
    assert!(matches!(err, Error::SizeExceeded(_)), "{err}");
}

#[test]
fn missing_model_is_invalid_input() {
    let temp = registry_dir();
    write_worker(temp.path(), &WorkerDefinition::new("bare", "No model anywhere."));
    let err = run_worker(
        Arc::new(runtime(temp.path(), ScriptedProvider::new())),
        WorkerRequest::new("bare", json!({})),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "{err}");
}
