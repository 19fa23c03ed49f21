//! Shell execution for `run_bash`: `sh -c` with a wall-clock timeout and
//! bounded output capture.

use std::io::{self, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// Limits applied to one shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

impl Default for ShellLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            output_limit_bytes: 100_000,
        }
    }
}

/// Captured result of a shell command.
#[derive(Debug)]
pub struct ShellOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: u64,
    pub stderr_truncated: u64,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn stdout_text(&self) -> String {
        with_notice("stdout", &self.stdout, self.stdout_truncated)
    }

    pub fn stderr_text(&self) -> String {
        with_notice("stderr", &self.stderr, self.stderr_truncated)
    }

    /// Exit code as text, or `signal` when the process was killed by one.
    pub fn exit_label(&self) -> String {
        self.status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

fn with_notice(stream: &str, bytes: &[u8], truncated: u64) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{stream} truncated {truncated} bytes]\n"));
    }
    text
}

/// Run `command` with `sh -c` in `cwd`.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty command cannot block on a full pipe. The shell leads its own
/// process group; a command that outlives the timeout has the whole group
/// killed and is reported with `timed_out` set.
#[instrument(skip_all, fields(cwd = %cwd.display(), timeout_secs = limits.timeout.as_secs()))]
pub fn run_shell(command: &str, cwd: &Path, limits: ShellLimits) -> Result<ShellOutput> {
    let mut shell = Command::new("sh");
    shell
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    shell.process_group(0);

    let mut child = match shell.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(%err, "failed to spawn shell");
            return Err(err).context("spawn sh");
        }
    };

    let limit = limits.output_limit_bytes as u64;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || capture(stdout, limit));
    let stderr_reader = thread::spawn(move || capture(stderr, limit));

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for shell")? {
        Some(status) => (status, false),
        None => {
            warn!("shell command timed out, killing");
            kill_tree(&mut child)?;
            (child.wait().context("reap killed shell")?, true)
        }
    };

    let (stdout, stdout_truncated) = stdout_reader
        .join()
        .map_err(|_| anyhow!("stdout reader panicked"))??;
    let (stderr, stderr_truncated) = stderr_reader
        .join()
        .map_err(|_| anyhow!("stderr reader panicked"))??;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "shell output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "shell command finished");
    Ok(ShellOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill the shell and everything it started, so no descendant keeps the
/// output pipes open.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    let group = i32::try_from(child.id()).context("shell pid out of range")?;
    match killpg(Pid::from_raw(group), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(%err, "killpg failed, killing shell only");
            child.kill().context("kill shell")
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill shell")
}

/// Keep the first `limit` bytes of `reader` and count the rest.
fn capture<R: Read>(mut reader: R, limit: u64) -> Result<(Vec<u8>, u64)> {
    let mut kept = Vec::new();
    (&mut reader)
        .take(limit)
        .read_to_end(&mut kept)
        .context("read shell output")?;
    let dropped = io::copy(&mut reader, &mut io::sink()).context("drain shell output")?;
    Ok((kept, dropped))
}
