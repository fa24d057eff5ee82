//! Command Gate
//!
//! Validate-then-execute path for caller-supplied command lines.
//!
//! # Security Model
//!
//! - **Allowlist**: the first shell word must name an allowed program
//! - **Denylist**: case-insensitive phrases that block a command outright
//! - **No shell**: the argv is executed directly, never via `sh -c`
//! - **Timeout**: children are killed once their wall-clock budget runs out
//!
//! The denylist is a heuristic and only the leading verb is allowlisted.
//! This is not a sandbox: there is no namespace, cgroup or privilege
//! isolation.
//!
//! # Architecture
//!
//! - `policy.rs`: allowlist and denylist tables
//! - `validator.rs`: tokenization and the allow/deny decision
//! - `executor.rs`: subprocess execution and result mapping
//! - `timeout.rs`: wall-clock budget
//! - `error.rs`: error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use extendipede::gate::CommandGate;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gate = CommandGate::default();
//!     let result = gate.run("echo hello").await;
//!     println!("{}: {}", result.success, result.output);
//! }
//! ```

mod error;
mod executor;
mod policy;
mod timeout;
mod validator;

pub use error::GateError;
pub use executor::{
    CommandExecutor, Execute, ExecutionResult, ExecutorConfig, Outcome,
    DEFAULT_MAX_OUTPUT_BYTES, NO_ERROR_PLACEHOLDER, NO_OUTPUT_PLACEHOLDER,
};
pub use policy::{
    default_allowed_commands, default_deny_patterns, AllowedCommandSet, DenyPatternSet,
};
pub use timeout::{ExecutionTimeout, DEFAULT_TIMEOUT_SECS};
pub use validator::{tokenize, CommandValidator, Decision, DEFAULT_MAX_COMMAND_LENGTH};

use crate::config::GateConfig;
use crate::metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest command preview written to logs
const LOG_PREVIEW_CHARS: usize = 120;

/// The validator and executor wired together
#[derive(Clone)]
pub struct CommandGate {
    validator: CommandValidator,
    executor: Arc<dyn Execute>,
    timeout: ExecutionTimeout,
    working_dir: Option<PathBuf>,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new(
            CommandValidator::default(),
            Arc::new(CommandExecutor::new()),
            ExecutionTimeout::default(),
        )
    }
}

impl std::fmt::Debug for CommandGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGate")
            .field("validator", &self.validator)
            .field("timeout", &self.timeout)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl CommandGate {
    pub fn new(
        validator: CommandValidator,
        executor: Arc<dyn Execute>,
        timeout: ExecutionTimeout,
    ) -> Self {
        Self {
            validator,
            executor,
            timeout,
            working_dir: None,
        }
    }

    /// Record the directory the executor runs children in
    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Build the gate from startup configuration
    pub fn from_config(config: &GateConfig) -> Self {
        let allowed = AllowedCommandSet::from_entries(config.allowed_commands.clone());
        let denied = DenyPatternSet::new(&config.deny_patterns);
        let validator =
            CommandValidator::new(Arc::new(allowed), Arc::new(denied), config.max_command_length);
        let executor = CommandExecutor::with_config(ExecutorConfig {
            max_output_bytes: config.max_output_bytes,
            working_dir: config.working_dir.clone(),
        });
        Self::new(
            validator,
            Arc::new(executor),
            ExecutionTimeout::from_secs(config.timeout_secs),
        )
        .with_working_dir(config.working_dir.clone())
    }

    /// Validate without executing
    pub fn validate(&self, raw: &str) -> Decision {
        self.validator.validate(raw)
    }

    /// Validate `raw` and, if allowed, execute it
    ///
    /// Never fails: every denial and execution error comes back as an
    /// unsuccessful `ExecutionResult`.
    pub async fn run(&self, raw: &str) -> ExecutionResult {
        let request_id = Uuid::new_v4();
        let decision = self.validator.validate(raw);
        metrics::record_decision(&decision);

        let tokens = match decision.into_result() {
            Ok(tokens) => tokens,
            Err(denial) => {
                audit_denial(request_id, raw, &denial);
                return ExecutionResult::from_error(&denial, 0.0);
            }
        };

        info!(
            target: "audit",
            request_id = %request_id,
            program = %tokens[0],
            command = %preview(raw),
            "Executing command"
        );

        let executor = Arc::clone(&self.executor);
        let timeout = self.timeout;
        let handle = tokio::spawn(async move { executor.execute(&tokens, timeout).await });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Execution task failed");
                ExecutionResult::from_error(&GateError::Internal(e.to_string()), 0.0)
            }
        };
        metrics::record_execution(&result);

        debug!(request_id = %request_id, summary = %result.summary(), "Command finished");
        result
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub fn allowed_commands(&self) -> &AllowedCommandSet {
        self.validator.allowed_commands()
    }

    pub fn timeout(&self) -> ExecutionTimeout {
        self.timeout
    }

    /// Configured working directory; `None` means children inherit the server's
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

/// Log a denial; policy hits go to the audit target, the rest stay at debug
fn audit_denial(request_id: Uuid, raw: &str, denial: &GateError) {
    match denial {
        GateError::DangerousPattern(pattern) => warn!(
            target: "audit",
            request_id = %request_id,
            pattern = %pattern,
            command = %preview(raw),
            "Dangerous command blocked"
        ),
        GateError::NotAllowed(program) => info!(
            target: "audit",
            request_id = %request_id,
            program = %program,
            command = %preview(raw),
            "Command not in allowlist"
        ),
        other => debug!(
            request_id = %request_id,
            reason = other.reason(),
            "Command rejected"
        ),
    }
}

fn preview(raw: &str) -> String {
    if raw.chars().count() > LOG_PREVIEW_CHARS {
        let head: String = raw.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        raw.to_string()
    }
}
