//! Harness for LLM workers: named, persisted prompt configurations that run
//! against sandboxed files, call tools through an approval gate, and delegate
//! to each other.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (message types, glob and suffix matching, the
//!   call stack, approval state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (sandboxes, attachments, the worker
//!   registry, templates, config, processes, the terminal prompter).
//! - **[`model`]**: Provider clients behind the [`model::ModelClient`] trait.
//! - **[`tools`]**: Tools exposed to models and the registry that validates,
//!   gates and dispatches their calls.
//!
//! Orchestration modules ([`worker`], [`spec_mode`]) drive the model/tool loop
//! and implement the CLI commands.

pub mod core;
pub mod display;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod model;
pub mod spec_mode;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod worker;

pub use error::{Error, ErrorKind, Result};
pub use worker::{Runtime, RuntimeSettings, WorkerRequest, run_worker, run_worker_async};
