//! Command execution capability.
//!
//! All external processes (the container runtime CLI, and through it every
//! command run inside a container) go through [`CommandExecutor`]. Production
//! code uses [`ProcessExecutor`]; tests use [`ScriptedExecutor`] to control
//! exit codes and assert the exact order of invocations.

use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from launching a process.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("waiting for {program} failed: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Data written to a process's standard input.
///
/// Used for secrets: it is never part of the rendered command line and its
/// `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretInput(String);

impl SecretInput {
    pub fn new(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretInput(<redacted>)")
    }
}

/// A program, its arguments and optional standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<SecretInput>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Feed `input` to the process on stdin.
    pub fn stdin(mut self, input: SecretInput) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn with_status(status: i32) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs commands and reports their exit status.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` to completion.
    ///
    /// A non-zero exit is not an error here; only failing to run the
    /// process at all is.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ExecError>;
}

/// Executor backed by real child processes.
///
/// Output is forwarded line by line to the log while the process runs, so
/// operators can follow long installs. It is never parsed.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ExecError> {
        info!(command = %command, stdin = command.stdin.is_some(), "Executing");

        let stdin = if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let input = write_input(child.stdin.take(), command.stdin.as_ref());
        let stdout = forward_lines(child.stdout.take(), "stdout");
        let stderr = forward_lines(child.stderr.take(), "stderr");

        let ((), stdout, stderr, status) = tokio::join!(input, stdout, stderr, child.wait());
        let status = status.map_err(|source| ExecError::Wait {
            program: command.program.clone(),
            source,
        })?;

        debug!(command = %command, status = ?status.code(), "Command finished");

        Ok(CommandOutput {
            status: status.code(),
            stdout,
            stderr,
        })
    }
}

async fn write_input(stdin: Option<tokio::process::ChildStdin>, input: Option<&SecretInput>) {
    let (Some(mut stdin), Some(input)) = (stdin, input) else {
        return;
    };
    // A process may exit without reading its input; its exit status decides.
    if let Err(e) = stdin.write_all(input.expose().as_bytes()).await {
        debug!(error = %e, "Process did not read its input");
    }
}

async fn forward_lines<R>(reader: Option<R>, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return collected;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                info!(stream, "{line}");
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) => {
                debug!(stream, error = %e, "Stopped reading process output");
                break;
            }
        }
    }
    collected
}

#[derive(Debug, Clone)]
enum Response {
    Exit(i32),
    SpawnError,
}

/// Fake executor with scripted exit codes.
///
/// Rules match when the rendered command line contains a substring. Rules are
/// checked in the order they were added; the first match wins. Commands that
/// match no rule exit with the default code (0 unless changed).
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Vec<(String, Response)>,
    default_exit: i32,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    /// An executor where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` for commands containing `pattern`.
    pub fn exit_when(mut self, pattern: impl Into<String>, code: i32) -> Self {
        self.rules.push((pattern.into(), Response::Exit(code)));
        self
    }

    /// Fail with exit code 1 for commands containing `pattern`.
    pub fn fail_when(self, pattern: impl Into<String>) -> Self {
        self.exit_when(pattern, 1)
    }

    /// Succeed for commands containing `pattern`, regardless of the default.
    pub fn succeed_when(self, pattern: impl Into<String>) -> Self {
        self.exit_when(pattern, 0)
    }

    /// Fail to spawn commands containing `pattern`.
    pub fn spawn_error_when(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), Response::SpawnError));
        self
    }

    /// Exit code for commands that match no rule.
    pub fn with_default_exit(mut self, code: i32) -> Self {
        self.default_exit = code;
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rendered command lines of every command run so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ExecError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.clone());

        let line = command.to_string();
        let response = self
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(Response::Exit(self.default_exit));

        match response {
            Response::Exit(code) => {
                debug!(command = %line, exit_code = code, "[MOCK] Command finished");
                Ok(CommandOutput::with_status(code))
            }
            Response::SpawnError => Err(ExecError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display() {
        let cmd = CommandSpec::new("lxc").args(["launch", "alpine-3.20-amd64", "ci"]);
        assert_eq!(cmd.to_string(), "lxc launch alpine-3.20-amd64 ci");
    }

    #[tokio::test]
    async fn test_scripted_first_rule_wins() {
        let executor = ScriptedExecutor::new()
            .succeed_when("apk add")
            .fail_when("apk");

        let ok = executor
            .run(&CommandSpec::new("sh").args(["-c", "apk add openssh"]))
            .await
            .unwrap();
        let failed = executor
            .run(&CommandSpec::new("sh").args(["-c", "apk update"]))
            .await
            .unwrap();

        assert!(ok.success());
        assert_eq!(failed.status, Some(1));
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_default_exit() {
        let executor = ScriptedExecutor::new().with_default_exit(127);
        let output = executor.run(&CommandSpec::new("true")).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.status, Some(127));
    }

    #[tokio::test]
    async fn test_scripted_spawn_error() {
        let executor = ScriptedExecutor::new().spawn_error_when("lxc");
        let err = executor.run(&CommandSpec::new("lxc")).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_process_executor_reports_exit_code() {
        let executor = ProcessExecutor::new();
        let output = executor
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_process_executor_feeds_stdin() {
        let executor = ProcessExecutor::new();
        let output = executor
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "read line; echo \"got $line\"; echo oops >&2"])
                    .stdin(SecretInput::new("root:pw\n")),
            )
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "got root:pw\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_process_executor_ignores_unread_stdin() {
        let executor = ProcessExecutor::new();
        let output = executor
            .run(&CommandSpec::new("true").stdin(SecretInput::new("x".repeat(1 << 20))))
            .await
            .unwrap();
        assert!(output.success());
    }

    #[test]
    fn test_stdin_hidden_from_display_and_debug() {
        let cmd = CommandSpec::new("lxc")
            .args(["exec", "ci-1", "--", "chpasswd"])
            .stdin(SecretInput::new("root:TopSecret123\n"));
        assert_eq!(cmd.to_string(), "lxc exec ci-1 -- chpasswd");
        assert!(!format!("{cmd:?}").contains("TopSecret123"));
    }

    #[tokio::test]
    async fn test_process_executor_missing_binary() {
        let executor = ProcessExecutor::new();
        let err = executor
            .run(&CommandSpec::new("/nonexistent/lxcci-no-such-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
