//! Error types for the SECL engine crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Position of a token inside an expression, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("Syntax error at {position} in `{expression}`: {message}")]
    Syntax {
        expression: String,
        position: Position,
        message: String,
    },
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Unknown macro: {0}")]
    UnknownMacro(String),
    #[error("Event type conflict: `{first}` and `{second}` in the same expression")]
    EventTypeConflict { first: String, second: String },
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("No event type: `{0}` references no field bound to an event type")]
    NoEventType(String),
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),
    #[error("Capability error: no variant of `{0}` is supported by this engine")]
    Capability(String),
    #[error("Unknown standard rule: {0}")]
    UnknownStandardRule(String),
    #[error("Duplicate rule ID: {0}")]
    DuplicateRule(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Marshal error: {0}")]
    Marshal(String),
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("YAML parsing error: {0}")]
    YamlError(String),
}

impl PolicyError {
    /// True for errors raised by the parsing frontend.
    pub fn is_syntax(&self) -> bool {
        matches!(self, PolicyError::Syntax { .. })
    }

    /// True for errors raised while turning an AST into evaluators.
    pub fn is_compilation(&self) -> bool {
        matches!(
            self,
            PolicyError::UnknownField(_)
                | PolicyError::UnknownMacro(_)
                | PolicyError::EventTypeConflict { .. }
                | PolicyError::TypeMismatch(_)
                | PolicyError::NoEventType(_)
                | PolicyError::InvalidRegex(_)
        )
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for PolicyError {
    fn from(err: serde_yaml::Error) -> Self {
        PolicyError::YamlError(err.to_string())
    }
}

impl From<regex::Error> for PolicyError {
    fn from(err: regex::Error) -> Self {
        PolicyError::InvalidRegex(err.to_string())
    }
}

/// A compilation failure attributed to one rule or macro of a batch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{id}: {error}")]
pub struct RuleCompileError {
    pub id: String,
    pub error: PolicyError,
}

impl RuleCompileError {
    pub fn new(id: impl Into<String>, error: PolicyError) -> Self {
        Self {
            id: id.into(),
            error,
        }
    }
}
