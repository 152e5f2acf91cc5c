//! External tool invocation.
//!
//! Backends never spawn processes directly; they go through
//! [`CommandRunner`] so tests can script tool output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{DnsChangeError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr, like a shell's `2>&1`.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Runs external configuration tools.
///
/// Implementations return `Err` only when the tool could not be run at all
/// (or timed out). A non-zero exit is reported through
/// [`CommandOutput::success`]; use [`run_checked`] to turn it into an error.
pub trait CommandRunner {
    /// Runs `program` with `args` and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`DnsChangeError::ToolInvocationFailed`] if the process cannot
    /// be spawned or does not finish in time.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }
}

/// Runs a tool and fails on a non-zero exit status.
///
/// # Errors
///
/// Returns [`DnsChangeError::ToolInvocationFailed`] on spawn failure, timeout
/// or unsuccessful exit.
pub fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput> {
    let output = runner.run(program, args)?;
    if output.success {
        return Ok(output);
    }
    let status = output
        .code
        .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit status {c}"));
    let detail = output.combined();
    let detail = detail.trim();
    Err(DnsChangeError::tool(
        program,
        if detail.is_empty() {
            status
        } else {
            format!("{status}: {detail}")
        },
    ))
}

/// Spawns real processes via [`std::process::Command`].
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    /// Creates a runner that waits indefinitely.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Kills the tool and reports failure if it runs longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!(program, ?args, "Running configuration tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DnsChangeError::tool(program, e.to_string()))?;

        // Drain both pipes on their own threads so a chatty tool cannot
        // block on a full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.timeout {
            Some(timeout) => wait_with_deadline(&mut child, timeout),
            None => child.wait().map_err(|e| e.to_string()),
        }
        .map_err(|reason| DnsChangeError::tool(program, reason))?;

        Ok(CommandOutput {
            code: status.code(),
            success: status.success(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                tracing::debug!(error = %e, read = buf.len(), "Tool output truncated");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::result::Result<ExitStatus, String> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("timed out after {timeout:?}"));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(CommandOutput);

    impl CommandRunner for Canned {
        fn run(&self, _program: &str, _args: &[&str]) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn combined_appends_stderr() {
        let out = CommandOutput {
            stdout: "a\n".into(),
            stderr: "b\n".into(),
            ..CommandOutput::default()
        };
        assert_eq!(out.combined(), "a\nb\n");
    }

    #[test]
    fn run_checked_rejects_failure_status() {
        let runner = Canned(CommandOutput::failed(1, "ifconfig: bad address\n"));
        let err = run_checked(&runner, "ifconfig", &["lo0"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "`ifconfig` failed: exit status 1: ifconfig: bad address"
        );
    }

    #[test]
    fn run_checked_passes_success_through() {
        let runner = Canned(CommandOutput::ok("fine"));
        assert_eq!(run_checked(&runner, "x", &[]).unwrap().stdout, "fine");
    }

    /// Yields one chunk, then fails like a pipe torn down mid-read.
    struct BrokenPipe(bool);

    impl Read for BrokenPipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if std::mem::replace(&mut self.0, true) {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            let chunk = b"partial";
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[test]
    fn drain_keeps_output_read_before_an_error() {
        assert_eq!(drain(Some(BrokenPipe(false))).join().unwrap(), "partial");
        assert_eq!(drain(None::<BrokenPipe>).join().unwrap(), "");
    }

    #[test]
    fn missing_program_is_tool_failure() {
        let err = SystemRunner::new()
            .run("dnschange-no-such-tool", &[])
            .unwrap_err();
        assert!(matches!(err, DnsChangeError::ToolInvocationFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_status() {
        let out = SystemRunner::new().run("sh", &["-c", "echo hi; exit 3"]).unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.code, Some(3));
        assert!(!out.success);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_reported_as_tool_failure() {
        let runner = SystemRunner::new().with_timeout(Duration::from_millis(100));
        let err = runner.run("sleep", &["5"]).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
