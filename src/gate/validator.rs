//! Command Validation Module
//!
//! Decides whether a raw command string may run. The checks, in order:
//!
//! 1. Length cap on the raw text
//! 2. POSIX shell word splitting (quotes and escapes only, no expansion)
//! 3. Empty token list
//! 4. Case-insensitive denylist scan of the raw text
//! 5. Allowlist lookup of the first token
//!
//! Only the leading verb is gated. Arguments are passed through untouched,
//! so an allowlisted program with hostile arguments is still allowed unless a
//! denylist phrase catches it.

use super::error::GateError;
use super::policy::{AllowedCommandSet, DenyPatternSet};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Default maximum length of a raw command, in characters
pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 1000;

/// Validator output: allow/deny, a short reason, and the parsed tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether execution is permitted
    pub allow: bool,

    /// Short reason ("allowed", "too long", "command not allowed", ...)
    pub reason: String,

    /// Parsed argv; empty unless tokenization succeeded
    pub tokens: Vec<String>,

    /// The denial, when `allow` is false
    #[serde(skip)]
    pub denial: Option<GateError>,
}

impl Decision {
    fn allowed(tokens: Vec<String>) -> Self {
        Self {
            allow: true,
            reason: "allowed".to_string(),
            tokens,
            denial: None,
        }
    }

    fn denied(error: GateError, tokens: Vec<String>) -> Self {
        Self {
            allow: false,
            reason: error.reason().to_string(),
            tokens,
            denial: Some(error),
        }
    }

    /// Convert into the token list, or the denial
    pub fn into_result(self) -> Result<Vec<String>, GateError> {
        match self.denial {
            Some(err) => Err(err),
            None => Ok(self.tokens),
        }
    }
}

/// Command validator over shared, read-only policy tables
#[derive(Debug, Clone)]
pub struct CommandValidator {
    allowed: Arc<AllowedCommandSet>,
    denied: Arc<DenyPatternSet>,
    max_command_length: usize,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(
            Arc::new(AllowedCommandSet::default()),
            Arc::new(DenyPatternSet::default()),
            DEFAULT_MAX_COMMAND_LENGTH,
        )
    }
}

impl CommandValidator {
    pub fn new(
        allowed: Arc<AllowedCommandSet>,
        denied: Arc<DenyPatternSet>,
        max_command_length: usize,
    ) -> Self {
        Self {
            allowed,
            denied,
            max_command_length,
        }
    }

    /// Validate a raw command line
    ///
    /// # Example
    ///
    /// ```
    /// use extendipede::gate::CommandValidator;
    ///
    /// let validator = CommandValidator::default();
    /// let decision = validator.validate(r#"echo "a b" c"#);
    /// assert!(decision.allow);
    /// assert_eq!(decision.tokens, vec!["echo", "a b", "c"]);
    /// ```
    pub fn validate(&self, raw: &str) -> Decision {
        let length = raw.chars().count();
        if length > self.max_command_length {
            return Decision::denied(
                GateError::TooLong(length, self.max_command_length),
                Vec::new(),
            );
        }

        let tokens = match tokenize(raw) {
            Some(tokens) => tokens,
            None => return Decision::denied(GateError::ParseError, Vec::new()),
        };

        let Some(program) = tokens.first() else {
            return Decision::denied(GateError::EmptyCommand, tokens);
        };

        // Denylist wins over the allowlist
        if let Some(pattern) = self.denied.find_match(raw) {
            return Decision::denied(GateError::DangerousPattern(pattern.to_string()), tokens);
        }

        if !self.allowed.contains(program) {
            let program = program.clone();
            return Decision::denied(GateError::NotAllowed(program), tokens);
        }

        Decision::allowed(tokens)
    }

    /// Check if a command name is in the allowlist
    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowed.contains(command)
    }

    pub fn allowed_commands(&self) -> &AllowedCommandSet {
        &self.allowed
    }

    pub fn deny_patterns(&self) -> &DenyPatternSet {
        &self.denied
    }

    pub fn max_command_length(&self) -> usize {
        self.max_command_length
    }
}

/// Split a command line into words the way a POSIX shell would, without
/// performing any expansion. Returns `None` on unbalanced quotes.
///
/// `#` is an ordinary character here: `echo a # b` yields four words.
pub fn tokenize(raw: &str) -> Option<Vec<String>> {
    shlex::split(&escape_comment_markers(raw))
}

/// Backslash-escape every unquoted `#` so shlex keeps it as a literal
fn escape_comment_markers(raw: &str) -> Cow<'_, str> {
    if !raw.contains('#') {
        return Cow::Borrowed(raw);
    }

    let mut escaped = String::with_capacity(raw.len() + 4);
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (None, '#') => escaped.push_str("\\#"),
            (None, '\\') | (Some('"'), '\\') => {
                escaped.push(ch);
                if let Some(next) = chars.next() {
                    escaped.push(next);
                }
            }
            (None, '\'' | '"') => {
                quote = Some(ch);
                escaped.push(ch);
            }
            (Some(open), _) if ch == open => {
                quote = None;
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    Cow::Owned(escaped)
}
