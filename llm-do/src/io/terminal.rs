//! Interactive approval prompts on the controlling terminal.

use std::io::{BufRead, BufReader, Stderr, Stdin, Write};
use std::sync::Mutex;

use anyhow::{Context, anyhow};

use crate::core::approval::{ApprovalPrompter, ApprovalRequest, ApprovalResponse};
use crate::error::Result;

const PROMPT: &str = "Approve? [y]es, [n]o, [a]lways, [q]uit: ";

/// Parse one line of prompt input. `None` means the input was not understood.
pub fn parse_response(line: &str) -> Option<ApprovalResponse> {
    match line.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => Some(ApprovalResponse::Accept),
        "n" | "no" => Some(ApprovalResponse::Decline),
        "a" | "always" => Some(ApprovalResponse::AcceptAll),
        "q" | "quit" => Some(ApprovalResponse::Quit),
        _ => None,
    }
}

/// Prompts on a writer (stderr by default) and reads answers from a reader
/// (stdin by default). Invalid answers re-prompt; end of input quits.
pub struct TerminalPrompter<R, W> {
    io: Mutex<(R, W)>,
}

impl TerminalPrompter<BufReader<Stdin>, Stderr> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

impl<R, W> ApprovalPrompter for TerminalPrompter<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn prompt(&self, request: &ApprovalRequest<'_>) -> Result<ApprovalResponse> {
        let mut guard = self
            .io
            .lock()
            .map_err(|_| anyhow!("approval prompt lock poisoned"))?;
        let (reader, writer) = &mut *guard;
        let arguments = serde_json::to_string(request.arguments)
            .unwrap_or_else(|_| request.arguments.to_string());
        writeln!(writer, "\nTool call: {}({arguments})", request.tool_name)
            .context("write approval prompt")?;
        loop {
            write!(writer, "{PROMPT}").context("write approval prompt")?;
            writer.flush().context("flush approval prompt")?;
            let mut line = String::new();
            let read = reader.read_line(&mut line).context("read approval answer")?;
            if read == 0 {
                return Ok(ApprovalResponse::Quit);
            }
            match parse_response(&line) {
                Some(response) => return Ok(response),
                None => writeln!(writer, "Please answer y, n, a, or q.")
                    .context("write approval prompt")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn ask(input: &str) -> (ApprovalResponse, String) {
        let prompter = TerminalPrompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());
        let args = json!({"path": "plan.md"});
        let request = ApprovalRequest {
            tool_name: "sandbox_write_text",
            arguments: &args,
        };
        let response = prompter.prompt(&request).expect("prompt");
        let (_, written) = prompter.io.into_inner().expect("lock");
        (response, String::from_utf8(written).expect("utf8"))
    }

    #[test]
    fn parses_all_answers() {
        assert_eq!(parse_response("\n"), Some(ApprovalResponse::Accept));
        assert_eq!(parse_response("YES"), Some(ApprovalResponse::Accept));
        assert_eq!(parse_response(" no "), Some(ApprovalResponse::Decline));
        assert_eq!(parse_response("always"), Some(ApprovalResponse::AcceptAll));
        assert_eq!(parse_response("q"), Some(ApprovalResponse::Quit));
        assert_eq!(parse_response("maybe"), None);
    }

    #[test]
    fn invalid_answer_reprompts() {
        let (response, output) = ask("maybe\na\n");
        assert_eq!(response, ApprovalResponse::AcceptAll);
        assert!(output.contains("Tool call: sandbox_write_text({\"path\":\"plan.md\"})"));
        assert_eq!(output.matches(PROMPT).count(), 2);
    }

    #[test]
    fn end_of_input_quits() {
        let (response, _) = ask("");
        assert_eq!(response, ApprovalResponse::Quit);
    }
}
