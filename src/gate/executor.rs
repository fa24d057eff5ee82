//! Command Executor
//!
//! Runs a validated argv as a child process with a wall-clock timeout and
//! maps every outcome into an `ExecutionResult`. The program is invoked
//! directly, never through a shell.

use super::error::GateError;
use super::timeout::ExecutionTimeout;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximum captured size per stream in bytes (1MB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const NO_OUTPUT_PLACEHOLDER: &str = "Command executed successfully (no output)";
pub const NO_ERROR_PLACEHOLDER: &str = "Command failed with no error message";

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Exited with status 0
    Completed,
    /// Exited non-zero or was killed by a signal
    Failed,
    /// Killed after exceeding the timeout
    TimedOut,
    /// Never started
    SpawnFailed,
    /// Rejected by the validator, nothing was run
    Denied,
    /// Worker task panicked or was cancelled
    Internal,
}

/// Normalized result of one gate call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether execution succeeded
    pub success: bool,

    /// Trimmed stdout on success, trimmed stderr on failure, or a message
    pub output: String,

    /// Error description, `None` on success
    pub error: Option<String>,

    /// Exit code, `None` when the child never exited on its own
    pub exit_code: Option<i32>,

    pub outcome: Outcome,

    /// Wall time in milliseconds
    pub duration_ms: f64,

    /// OS process id of the child, if one was spawned
    #[serde(skip)]
    pub pid: Option<u32>,
}

impl ExecutionResult {
    fn completed(stdout: String, duration_ms: f64, pid: Option<u32>) -> Self {
        let output = if stdout.is_empty() {
            NO_OUTPUT_PLACEHOLDER.to_string()
        } else {
            stdout
        };
        Self {
            success: true,
            output,
            error: None,
            exit_code: Some(0),
            outcome: Outcome::Completed,
            duration_ms,
            pid,
        }
    }

    fn failed(stderr: String, exit_code: Option<i32>, duration_ms: f64, pid: Option<u32>) -> Self {
        let output = if stderr.is_empty() {
            NO_ERROR_PLACEHOLDER.to_string()
        } else {
            stderr
        };
        let error = match exit_code {
            Some(code) => GateError::NonZeroExit(code),
            None => GateError::SignalTerminated,
        };
        Self {
            success: false,
            output,
            error: Some(error.to_string()),
            exit_code,
            outcome: Outcome::Failed,
            duration_ms,
            pid,
        }
    }

    /// Build a result for a failure that produced no exit status
    ///
    /// Denials carry the human message as `output` and the short reason as
    /// `error`; spawn and internal failures carry the description in both.
    pub fn from_error(error: &GateError, duration_ms: f64) -> Self {
        let (output, detail, outcome) = match error {
            GateError::Timeout(_) => (error.to_string(), error.reason().to_string(), Outcome::TimedOut),
            GateError::SpawnFailure(msg) => (
                format!("Error executing command: {msg}"),
                msg.clone(),
                Outcome::SpawnFailed,
            ),
            GateError::Internal(msg) => (
                format!("Error executing command: {msg}"),
                msg.clone(),
                Outcome::Internal,
            ),
            GateError::NonZeroExit(code) => {
                return Self::failed(String::new(), Some(*code), duration_ms, None)
            }
            GateError::SignalTerminated => {
                return Self::failed(String::new(), None, duration_ms, None)
            }
            _ => (error.to_string(), error.reason().to_string(), Outcome::Denied),
        };
        Self {
            success: false,
            output,
            error: Some(detail),
            exit_code: None,
            outcome,
            duration_ms,
            pid: None,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.outcome == Outcome::TimedOut
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self.outcome {
            Outcome::TimedOut => format!("Timeout after {:.0}ms", self.duration_ms),
            Outcome::Completed => format!(
                "Success (exit code: {:?}, {:.0}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.output.len()
            ),
            Outcome::Failed => format!(
                "Failed (exit code: {:?}, {:.0}ms)",
                self.exit_code, self.duration_ms
            ),
            Outcome::SpawnFailed | Outcome::Internal => {
                format!("Error ({})", self.error.as_deref().unwrap_or("unknown"))
            }
            Outcome::Denied => format!("Denied ({})", self.error.as_deref().unwrap_or("unknown")),
        }
    }
}

/// Anything that can run a validated argv
///
/// The gate talks to execution through this trait so tests can observe
/// whether anything was run at all.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, tokens: &[String], timeout: ExecutionTimeout) -> ExecutionResult;
}

/// Configuration for command execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum captured bytes per stream (default: 1MB)
    pub max_output_bytes: usize,

    /// Working directory override (default: inherit the current directory)
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            working_dir: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_output_bytes(size: usize) -> Self {
        Self {
            max_output_bytes: size,
            ..Default::default()
        }
    }

    pub fn with_working_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
            ..Default::default()
        }
    }
}

/// Subprocess executor
///
/// Children inherit the environment, get a null stdin and piped
/// stdout/stderr. On Unix each child leads its own process group so a
/// timeout can take down anything it forked.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `tokens` to completion or until `timeout` expires
    pub async fn run(&self, tokens: &[String], timeout: ExecutionTimeout) -> ExecutionResult {
        let start = Instant::now();
        let elapsed_ms = || start.elapsed().as_secs_f64() * 1000.0;

        let Some((program, args)) = tokens.split_first() else {
            return ExecutionResult::from_error(&GateError::EmptyCommand, elapsed_ms());
        };

        let mut command = TokioCommand::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to spawn process");
                return ExecutionResult::from_error(
                    &GateError::SpawnFailure(e.to_string()),
                    elapsed_ms(),
                );
            }
        };
        let pid = child.id();
        debug!(program = %program, pid = ?pid, args = args.len(), "Spawned child");

        let limit = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), limit));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), limit));

        let waited = timeout.run(child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                return ExecutionResult::from_error(
                    &GateError::Internal(format!("failed to wait for child: {e}")),
                    elapsed_ms(),
                );
            }
            Err(err) => {
                terminate(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                warn!(program = %program, timeout_secs = timeout.secs(), "Command timed out");
                let mut result = ExecutionResult::from_error(&err, elapsed_ms());
                result.pid = pid;
                return result;
            }
        };

        // A forked grandchild can hold the pipes open after the child exits
        let remaining = timeout.duration().saturating_sub(start.elapsed());
        let streams = ExecutionTimeout::new(remaining)
            .run(async { (join_capture(stdout_task).await, join_capture(stderr_task).await) })
            .await;
        let (stdout, stderr) = match streams {
            Ok(streams) => streams,
            Err(_) => {
                terminate(&mut child, pid).await;
                warn!(program = %program, "Command output still open at timeout");
                let mut result =
                    ExecutionResult::from_error(&GateError::Timeout(timeout.secs()), elapsed_ms());
                result.pid = pid;
                return result;
            }
        };

        finish(program, status, stdout, stderr, elapsed_ms(), pid)
    }
}

#[async_trait]
impl Execute for CommandExecutor {
    async fn execute(&self, tokens: &[String], timeout: ExecutionTimeout) -> ExecutionResult {
        self.run(tokens, timeout).await
    }
}

fn finish(
    program: &str,
    status: ExitStatus,
    stdout: Captured,
    stderr: Captured,
    duration_ms: f64,
    pid: Option<u32>,
) -> ExecutionResult {
    if status.success() {
        info!(program = %program, duration_ms, "Command succeeded");
        ExecutionResult::completed(stdout.into_text(), duration_ms, pid)
    } else {
        let code = status.code();
        warn!(program = %program, exit_code = ?code, duration_ms, "Command failed");
        ExecutionResult::failed(stderr.into_text(), code, duration_ms, pid)
    }
}

/// Kill the child and, on Unix, its process group, then reap it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
            // SAFETY: killpg only sends a signal; the group was created for this child
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already gone");
    }
}

/// Bytes read from one stream, capped at a limit
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn into_text(mut self) -> String {
        if self.truncated {
            trim_partial_char(&mut self.bytes);
        }
        let mut text = String::from_utf8_lossy(&self.bytes).trim().to_string();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Drop a multi-byte UTF-8 sequence cut short by the output cap
fn trim_partial_char(bytes: &mut Vec<u8>) {
    let tail = bytes.len().saturating_sub(3);
    let Some(lead) = (tail..bytes.len()).rev().find(|&i| bytes[i] & 0xC0 != 0x80) else {
        return;
    };
    if let Err(e) = std::str::from_utf8(&bytes[lead..]) {
        if e.error_len().is_none() {
            bytes.truncate(lead);
        }
    }
}

/// Drain a stream to EOF, keeping at most `limit` bytes
///
/// Draining past the limit keeps the child from blocking on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };

    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.bytes.len());
        captured.bytes.extend_from_slice(&buf[..n.min(room)]);
        if n > room {
            captured.truncated = true;
        }
    }
    Ok(captured)
}

async fn join_capture(task: JoinHandle<std::io::Result<Captured>>) -> Captured {
    match task.await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read child output");
            Captured::default()
        }
        Err(e) => {
            warn!(error = %e, "Output reader task failed");
            Captured::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(&argv(&["echo", "hello"]), ExecutionTimeout::default())
            .await;

        assert!(result.success);
        assert_eq!(result.output, "hello");
        assert_eq!(result.error, None);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.outcome, Outcome::Completed);
        assert!(result.duration_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_output_is_trimmed() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(&argv(&["printf", "  padded \n\n"]), ExecutionTimeout::default())
            .await;
        assert_eq!(result.output, "padded");
    }

    #[tokio::test]
    async fn test_success_without_output() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(&argv(&["true"]), ExecutionTimeout::default())
            .await;

        assert!(result.success);
        assert_eq!(result.output, NO_OUTPUT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_stderr_discarded_on_success() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(
                &argv(&["sh", "-c", "echo out; echo err >&2"]),
                ExecutionTimeout::default(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.output, "out");
    }

    #[tokio::test]
    async fn test_failing_command_without_stderr() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(&argv(&["false"]), ExecutionTimeout::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.output, NO_ERROR_PLACEHOLDER);
        assert_eq!(
            result.error.as_deref(),
            Some("Command failed with return code 1")
        );
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(
                &argv(&["sh", "-c", "echo out; echo boom >&2; exit 3"]),
                ExecutionTimeout::default(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.output, "boom");
        assert_eq!(
            result.error.as_deref(),
            Some("Command failed with return code 3")
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let executor = CommandExecutor::new();
        let started = Instant::now();
        let result = executor
            .run(&argv(&["sleep", "10"]), ExecutionTimeout::from_secs(1))
            .await;

        assert!(!result.success);
        assert!(result.timed_out());
        assert_eq!(result.output, "Command timed out after 1 seconds");
        assert_eq!(result.error.as_deref(), Some("Timeout"));
        assert_eq!(result.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_with_forked_grandchild() {
        use sysinfo::{Pid, ProcessStatus, System};

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = format!("sleep 10 & echo $! > {}", pid_file.display());

        let executor = CommandExecutor::new();
        let started = Instant::now();
        // The shell exits at once but its background sleep keeps stdout open
        let result = executor
            .run(&argv(&["sh", "-c", &script]), ExecutionTimeout::from_secs(1))
            .await;

        assert!(result.timed_out());
        assert!(started.elapsed() < Duration::from_secs(5));

        let grandchild: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();

        // The orphaned sleep is reaped by init; a zombie has already been killed
        let mut gone = false;
        for _ in 0..20 {
            let system = System::new_all();
            gone = system
                .process(Pid::from_u32(grandchild))
                .map_or(true, |p| p.status() == ProcessStatus::Zombie);
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(gone, "grandchild {} survived the process-group kill", grandchild);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(
                &argv(&["this-command-does-not-exist-12345"]),
                ExecutionTimeout::default(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.outcome, Outcome::SpawnFailed);
        assert!(result.output.starts_with("Error executing command: "));
        assert!(result.error.is_some());
        assert_eq!(result.pid, None);
    }

    #[tokio::test]
    async fn test_empty_argv() {
        let executor = CommandExecutor::new();
        let result = executor.run(&[], ExecutionTimeout::default()).await;
        assert!(!result.success);
        assert_eq!(result.outcome, Outcome::Denied);
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let executor = CommandExecutor::with_config(ExecutorConfig::with_max_output_bytes(100));
        let result = executor
            .run(&argv(&["seq", "1000"]), ExecutionTimeout::default())
            .await;

        assert!(result.success);
        assert!(result.output.ends_with("[output truncated]"));
        assert!(result.output.len() <= 100 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_truncation_keeps_whole_characters() {
        let executor = CommandExecutor::with_config(ExecutorConfig::with_max_output_bytes(4));
        let result = executor
            .run(&argv(&["printf", "abcé"]), ExecutionTimeout::default())
            .await;

        assert!(result.success);
        assert_eq!(result.output, format!("abc{TRUNCATION_MARKER}"));
        assert!(!result.output.contains('\u{FFFD}'));
    }

    #[test]
    fn test_trim_partial_char() {
        let mut bytes = "a😀".as_bytes()[..3].to_vec();
        trim_partial_char(&mut bytes);
        assert_eq!(bytes, b"a");

        let mut bytes = "aé".as_bytes().to_vec();
        trim_partial_char(&mut bytes);
        assert_eq!(bytes, "aé".as_bytes());

        let mut bytes = b"plain".to_vec();
        trim_partial_char(&mut bytes);
        assert_eq!(bytes, b"plain");

        let mut bytes = Vec::new();
        trim_partial_char(&mut bytes);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::with_config(ExecutorConfig::with_working_dir(dir.path()));

        let result = executor
            .run(&argv(&["pwd"]), ExecutionTimeout::default())
            .await;

        assert!(result.success);
        let expected = dir.path().canonicalize().unwrap();
        let reported = PathBuf::from(&result.output).canonicalize().unwrap();
        assert_eq!(reported, expected);
    }

    #[tokio::test]
    async fn test_environment_is_inherited() {
        let executor = CommandExecutor::new();
        let result = executor
            .run(&argv(&["env"]), ExecutionTimeout::default())
            .await;

        assert!(result.success);
        assert!(result.output.contains("PATH="));
    }

    #[tokio::test]
    async fn test_execute_trait_object() {
        let executor: Box<dyn Execute> = Box::new(CommandExecutor::new());
        let result = executor
            .execute(&argv(&["echo", "via trait"]), ExecutionTimeout::default())
            .await;
        assert_eq!(result.output, "via trait");
    }

    #[test]
    fn test_execution_result_summary() {
        let success = ExecutionResult::completed("output".to_string(), 100.0, None);
        assert!(success.summary().contains("Success"));

        let failure = ExecutionResult::failed("err".to_string(), Some(1), 100.0, None);
        assert!(failure.summary().contains("Failed"));

        let timeout = ExecutionResult::from_error(&GateError::Timeout(5), 5000.0);
        assert!(timeout.summary().contains("Timeout"));

        let denied = ExecutionResult::from_error(&GateError::NotAllowed("nc".into()), 0.0);
        assert!(denied.summary().contains("command not allowed"));
    }

    #[test]
    fn test_denial_result_shape() {
        let result = ExecutionResult::from_error(&GateError::NotAllowed("bash".into()), 0.0);
        assert!(!result.success);
        assert_eq!(result.output, "Command 'bash' is not allowed for security reasons.");
        assert_eq!(result.error.as_deref(), Some("command not allowed"));
        assert_eq!(result.outcome, Outcome::Denied);
    }

    #[test]
    fn test_signal_termination_message() {
        let result = ExecutionResult::failed(String::new(), None, 1.0, None);
        assert_eq!(result.error.as_deref(), Some("Command terminated by signal"));
        assert_eq!(result.output, NO_ERROR_PLACEHOLDER);
    }

    #[test]
    fn test_captured_truncation_marker() {
        let captured = Captured {
            bytes: b"abc".to_vec(),
            truncated: true,
        };
        assert_eq!(captured.into_text(), format!("abc{TRUNCATION_MARKER}"));
    }
}
