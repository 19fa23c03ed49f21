//! Approval gate for side-effecting tool calls.
//!
//! An [`ApprovalSession`] is created once per top-level run and passed to every
//! gated call (including calls made by delegated workers). It starts in
//! [`ApprovalMode::Prompting`]; an "always" answer moves it permanently to
//! [`ApprovalMode::AutoApproved`]. The prompter does the I/O, the session only
//! tracks state.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// What the gate shows the human for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest<'a> {
    pub tool_name: &'a str,
    pub arguments: &'a Value,
}

/// A human answer to one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    /// Run this call once.
    Accept,
    /// Run this call and every later one without asking.
    AcceptAll,
    /// Skip this call; the run continues.
    Decline,
    /// Abort the whole run.
    Quit,
}

/// Source of [`ApprovalResponse`]s (terminal, scripted tests, ...).
pub trait ApprovalPrompter: Send + Sync {
    fn prompt(&self, request: &ApprovalRequest<'_>) -> Result<ApprovalResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    Prompting,
    AutoApproved,
}

/// Outcome of passing a call through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Declined,
}

pub struct ApprovalSession {
    auto_approved: AtomicBool,
    prompter: Box<dyn ApprovalPrompter>,
}

impl ApprovalSession {
    pub fn new(prompter: Box<dyn ApprovalPrompter>) -> Self {
        Self {
            auto_approved: AtomicBool::new(false),
            prompter,
        }
    }

    /// Session that never prompts.
    pub fn auto_approved(prompter: Box<dyn ApprovalPrompter>) -> Self {
        Self {
            auto_approved: AtomicBool::new(true),
            prompter,
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        if self.auto_approved.load(Ordering::Relaxed) {
            ApprovalMode::AutoApproved
        } else {
            ApprovalMode::Prompting
        }
    }

    /// Ask whether `tool_name` may run with `arguments`.
    ///
    /// Returns `Declined` for a decline (only this call is skipped) and
    /// `Err(Cancelled)` for a quit (the run is aborted).
    pub fn check(&self, tool_name: &str, arguments: &Value) -> Result<Approval> {
        if self.mode() == ApprovalMode::AutoApproved {
            debug!(tool = tool_name, "auto-approved");
            return Ok(Approval::Approved);
        }
        let request = ApprovalRequest {
            tool_name,
            arguments,
        };
        match self.prompter.prompt(&request)? {
            ApprovalResponse::Accept => Ok(Approval::Approved),
            ApprovalResponse::AcceptAll => {
                self.auto_approved.store(true, Ordering::Relaxed);
                info!(tool = tool_name, "all tool calls approved for this session");
                Ok(Approval::Approved)
            }
            ApprovalResponse::Decline => {
                info!(tool = tool_name, "tool call declined");
                Ok(Approval::Declined)
            }
            ApprovalResponse::Quit => Err(Error::Cancelled(format!(
                "user quit at approval prompt for {tool_name}"
            ))),
        }
    }
}
