//! Transcript panels for `--verbose` runs, written to stderr.

use std::io::Write;
use std::sync::Mutex;

use serde_json::Value;

use crate::core::types::Message;
use crate::worker::RunObserver;

const PANEL_WIDTH: usize = 72;

/// Prints each transcript message as a titled panel.
pub struct TranscriptPrinter<W> {
    out: Mutex<W>,
    show_instructions: bool,
}

impl TranscriptPrinter<std::io::Stderr> {
    pub fn stderr(show_instructions: bool) -> Self {
        Self::new(std::io::stderr(), show_instructions)
    }
}

impl<W: Write> TranscriptPrinter<W> {
    pub fn new(out: W, show_instructions: bool) -> Self {
        Self {
            out: Mutex::new(out),
            show_instructions,
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn panel(&self, title: &str, body: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        // Best effort.
        let _ = writeln!(out, "{}", render_panel(title, body));
    }
}

impl<W: Write + Send> RunObserver for TranscriptPrinter<W> {
    fn worker_started(&self, worker: &str, model: &str, instructions: &str) {
        let title = format!("{worker} ({model})");
        if self.show_instructions {
            self.panel(&format!("{title} · instructions"), instructions);
        } else {
            self.panel(&title, "started");
        }
    }

    fn message(&self, worker: &str, message: &Message) {
        match message {
            Message::User {
                content,
                attachments,
            } => {
                let mut body = content.clone();
                if !attachments.is_empty() {
                    let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
                    body.push_str(&format!("\n\n+ {} attachment(s): {}", names.len(), names.join(", ")));
                }
                self.panel(&format!("{worker} · input"), &body);
            }
            Message::Assistant { text, tool_calls } => {
                if let Some(text) = text.as_deref().filter(|text| !text.trim().is_empty()) {
                    self.panel(&format!("{worker} · response"), text);
                }
                for call in tool_calls {
                    self.panel(
                        &format!("{worker} · tool call: {}", call.name),
                        &render_value(&call.arguments),
                    );
                }
            }
            Message::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => {
                let label = if *is_error { "tool error" } else { "tool result" };
                self.panel(&format!("{worker} · {label}: {tool_name}"), &render_value(content));
            }
        }
    }
}

/// Strings verbatim, everything else as pretty JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn render_panel(title: &str, body: &str) -> String {
    let heading = format!("┌─ {title} ");
    let fill = PANEL_WIDTH.saturating_sub(heading.chars().count());
    let mut panel = format!("{heading}{}\n", "─".repeat(fill));
    for line in body.lines() {
        panel.push_str("│ ");
        panel.push_str(line);
        panel.push('\n');
    }
    panel.push('└');
    panel.push_str(&"─".repeat(PANEL_WIDTH - 1));
    panel
}
