//! `llm-do` command line.
//!
//! `run` executes a persisted worker and prints its JSON result; `do` runs a
//! free-form task against a specification file with the base toolbox.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use llm_do::core::approval::ApprovalSession;
use llm_do::display::TranscriptPrinter;
use llm_do::io::config::load_project_config;
use llm_do::io::registry::{WorkerCreationProfile, WorkerRegistry};
use llm_do::io::terminal::TerminalPrompter;
use llm_do::model::HttpModelProvider;
use llm_do::spec_mode::{SpecRequest, execute_spec};
use llm_do::worker::{RunObserver, Runtime, RuntimeSettings, WorkerRequest, run_worker};
use llm_do::{Error, Result, exit_codes, logging};

#[derive(Parser)]
#[command(name = "llm-do", version, about = "Run LLM workers with sandboxes, approvals and delegation")]
struct Cli {
    /// Print the full error chain on failure.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker by name or by `.yaml` path and print its JSON result.
    Run(RunArgs),
    /// Execute a task according to a specification file.
    Do(DoArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Worker name, or path to a `.yaml`/`.yml` definition.
    worker: String,

    /// Plain-text input message. `--input` takes precedence.
    message: Option<String>,

    /// Registry root (inferred from a worker path, else the current directory).
    #[arg(long)]
    registry: Option<PathBuf>,

    /// JSON payload, or path to a JSON file, used as worker input.
    #[arg(long)]
    input: Option<String>,

    /// Override the entry worker's model (`provider:model`).
    #[arg(long)]
    model: Option<String>,

    /// Worker creation profile: inline JSON or a JSON file path.
    #[arg(long)]
    profile: Option<String>,

    /// Files attached to the worker's input.
    #[arg(long, num_args = 0..)]
    attachments: Vec<PathBuf>,

    /// Print compact JSON.
    #[arg(long)]
    no_pretty: bool,

    /// Approve every gated tool call without prompting.
    #[arg(long)]
    approve_all: bool,

    /// Show the transcript on stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Show each worker's rendered instructions in the transcript (implies `--verbose`).
    #[arg(long)]
    show_instructions: bool,
}

#[derive(clap::Args)]
struct DoArgs {
    /// Natural-language task description.
    task: String,

    /// Specification file (defaults to `[workflow] spec` in llm-do.toml).
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Working directory for tools and config discovery.
    #[arg(short = 'd', long = "working-dir")]
    working_dir: Option<PathBuf>,

    #[arg(short, long)]
    model: Option<String>,

    /// Print only the final response.
    #[arg(short, long)]
    quiet: bool,

    /// Prompt before every tool call.
    #[arg(long)]
    tools_approve: bool,

    /// Show the transcript on stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let debug = cli.debug;
    let code = match dispatch(cli.command) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{}", report(&err, debug));
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Run(args) => cmd_run(args),
        Command::Do(args) => cmd_do(args),
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let (registry_root, worker) = resolve_worker_target(&args.worker, args.registry.as_deref());
    let config = load_project_config(&registry_root)?;
    let input = load_input(args.input.as_deref(), args.message)?;
    let profile = match args.profile.as_deref() {
        Some(source) => WorkerCreationProfile::load(source)?,
        None => WorkerCreationProfile::default(),
    };

    let prompter = Box::new(TerminalPrompter::stdio());
    let approvals = if args.approve_all {
        ApprovalSession::auto_approved(prompter)
    } else {
        ApprovalSession::new(prompter)
    };
    let mut runtime = Runtime::new(
        WorkerRegistry::new(registry_root),
        Arc::new(HttpModelProvider::new()),
        approvals,
    )
    .with_profile(profile)
    .with_settings(RuntimeSettings::from(&config.runtime))
    .with_cli_model(args.model);
    if args.verbose || args.show_instructions {
        runtime = runtime.with_observer(Arc::new(TranscriptPrinter::stderr(args.show_instructions)));
    }

    let request = WorkerRequest {
        worker,
        input,
        attachments: args.attachments,
    };
    let result = run_worker(Arc::new(runtime), request)?;
    let serialized = if args.no_pretty {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{serialized}");
    Ok(())
}

fn cmd_do(args: DoArgs) -> Result<()> {
    let working_dir = match args.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    if !working_dir.is_dir() {
        return Err(Error::NotFound(format!("working directory {}", working_dir.display())));
    }
    let config = load_project_config(&working_dir)?;
    let request = SpecRequest {
        task: args.task,
        spec: args.spec,
        working_dir,
        model: args.model,
        quiet: args.quiet,
        tools_approve: args.tools_approve,
    };
    let printer = args.verbose.then(|| TranscriptPrinter::stderr(false));
    let observer = printer.as_ref().map(|printer| printer as &dyn RunObserver);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build async runtime")?;
    rt.block_on(execute_spec(
        &request,
        &config,
        &HttpModelProvider::new(),
        Box::new(TerminalPrompter::stdio()),
        observer,
        &mut std::io::stdout(),
    ))?;
    Ok(())
}

/// Registry root and worker name for a `run` target.
///
/// A `.yaml`/`.yml` path that exists names the worker by its file stem, with
/// the registry defaulting to the file's directory.
fn resolve_worker_target(worker: &str, registry: Option<&Path>) -> (PathBuf, String) {
    let path = Path::new(worker);
    let is_definition_file = path.is_file()
        && matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
    if is_definition_file {
        let root = registry
            .map(Path::to_path_buf)
            .or_else(|| path.parent().map(Path::to_path_buf))
            .filter(|root| !root.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| worker.to_string());
        return (root, name);
    }
    let root = registry
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    (root, worker.to_string())
}

/// Worker input: `--input` (a JSON file or inline JSON), else the message,
/// else `{}`.
fn load_input(input: Option<&str>, message: Option<String>) -> Result<Value> {
    if let Some(raw) = input {
        let path = Path::new(raw);
        let text = if path.is_file() {
            fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))?
        } else {
            raw.to_string()
        };
        return serde_json::from_str(&text)
            .map_err(|err| Error::InvalidInput(format!("--input is not valid JSON: {err}")));
    }
    Ok(message.map(Value::String).unwrap_or_else(|| Value::Object(Default::default())))
}

/// One-line diagnostic, or the full cause chain with `--debug`.
fn report(err: &Error, debug: bool) -> String {
    let mut out = format!("error: {err}");
    if debug {
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {cause}"));
            source = cause.source();
        }
    }
    out
}
