//! CLI tests for `llm-do run` and `llm-do do`.
//!
//! Spawns the binary and checks exit codes and the one-line diagnostic on
//! stderr. None of these reach a model provider.

use std::fs;
use std::process::Command;

use llm_do::exit_codes;

fn llm_do() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_llm-do"));
    command
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "off");
    command
}

#[test]
fn run_unknown_worker_fails_with_one_line() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = llm_do()
        .current_dir(temp.path())
        .args(["run", "ghost"])
        .output()
        .expect("llm-do run");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: not found: worker 'ghost'"), "{stderr}");
    assert_eq!(stderr.trim_end().lines().count(), 1);
}

#[test]
fn run_worker_path_without_api_key_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("greeter.yaml");
    fs::write(&path, "instructions: Greet.\nmodel: anthropic:claude-haiku-4-5\n").expect("worker");

    let output = llm_do()
        .args(["run", &path.to_string_lossy(), "hello"])
        .output()
        .expect("llm-do run");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ANTHROPIC_API_KEY is not set"), "{stderr}");
}

#[test]
fn run_rejects_malformed_input_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("greeter.yaml"), "instructions: Greet.\n").expect("worker");

    let output = llm_do()
        .current_dir(temp.path())
        .args(["run", "greeter", "--input", "{oops"])
        .output()
        .expect("llm-do run");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: invalid input: --input is not valid JSON"), "{stderr}");
}

#[test]
fn do_without_spec_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = llm_do()
        .args(["do", "triage", "-d", &temp.path().to_string_lossy()])
        .output()
        .expect("llm-do do");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pass --spec"), "{stderr}");
}

#[test]
fn do_rejects_model_outside_allow_list() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("SPEC.md"), "# Spec\n").expect("spec");
    fs::write(
        temp.path().join("llm-do.toml"),
        "[workflow]\nspec = \"SPEC.md\"\n\n[model]\nallowed_models = [\"anthropic:claude-sonnet-4-5\"]\n",
    )
    .expect("config");

    let output = llm_do()
        .env("OPENAI_API_KEY", "test-key")
        .args(["do", "triage", "-d", &temp.path().to_string_lossy(), "-m", "openai:gpt-4o"])
        .output()
        .expect("llm-do do");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("is not permitted for this workflow"), "{stderr}");
}
