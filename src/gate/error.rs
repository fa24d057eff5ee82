//! Gate Error Types
//!
//! Every way a request can fail inside the gate. None of these escape as a
//! process-fatal condition: the gate turns each into an `ExecutionResult`.

/// Error types for command validation and execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Raw command text exceeds the configured maximum
    #[error("Command length {0} exceeds maximum of {1} characters")]
    TooLong(usize, usize),

    /// Unbalanced quotes or a dangling escape
    #[error("Command could not be parsed: unbalanced quotes or trailing escape")]
    ParseError,

    /// Nothing left after word splitting
    #[error("No command provided")]
    EmptyCommand,

    /// Raw text contains a denylisted phrase
    #[error("Command blocked: contains dangerous pattern '{0}'")]
    DangerousPattern(String),

    /// Leading token is not allowlisted
    #[error("Command '{0}' is not allowed for security reasons.")]
    NotAllowed(String),

    /// Child exceeded its wall-clock budget
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    /// Child exited with a non-zero status
    #[error("Command failed with return code {0}")]
    NonZeroExit(i32),

    /// Child was killed by a signal before exiting
    #[error("Command terminated by signal")]
    SignalTerminated,

    /// Process could not be started
    #[error("{0}")]
    SpawnFailure(String),

    /// Anything unexpected (panicked or cancelled worker task)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Short, stable reason string used in decisions and API `error` fields
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TooLong(..) => "too long",
            Self::ParseError => "parse error",
            Self::EmptyCommand => "empty command",
            Self::DangerousPattern(_) => "dangerous pattern blocked",
            Self::NotAllowed(_) => "command not allowed",
            Self::Timeout(_) => "Timeout",
            Self::NonZeroExit(_) => "non-zero exit",
            Self::SignalTerminated => "terminated by signal",
            Self::SpawnFailure(_) => "spawn failure",
            Self::Internal(_) => "internal error",
        }
    }

    /// Whether this error is a policy denial that belongs in the audit log
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, Self::DangerousPattern(_) | Self::NotAllowed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_stable() {
        assert_eq!(GateError::TooLong(1001, 1000).reason(), "too long");
        assert_eq!(GateError::ParseError.reason(), "parse error");
        assert_eq!(GateError::EmptyCommand.reason(), "empty command");
        assert_eq!(
            GateError::DangerousPattern("rm -rf".into()).reason(),
            "dangerous pattern blocked"
        );
        assert_eq!(GateError::NotAllowed("bash".into()).reason(), "command not allowed");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            GateError::NotAllowed("bash".into()).to_string(),
            "Command 'bash' is not allowed for security reasons."
        );
        assert_eq!(
            GateError::Timeout(30).to_string(),
            "Command timed out after 30 seconds"
        );
        assert_eq!(
            GateError::NonZeroExit(1).to_string(),
            "Command failed with return code 1"
        );
    }

    #[test]
    fn test_security_relevance() {
        assert!(GateError::DangerousPattern("sudo ".into()).is_security_relevant());
        assert!(GateError::NotAllowed("nc".into()).is_security_relevant());
        assert!(!GateError::ParseError.is_security_relevant());
        assert!(!GateError::Timeout(5).is_security_relevant());
    }
}
