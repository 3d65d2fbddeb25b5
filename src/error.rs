//! Error types for monarch-runner operations.
//!
//! Defines error types for each subsystem:
//! - Container runtime access (sandbox lifecycle, exec)
//! - Judgment-based evaluation
//! - Gate execution and gate configuration
//! - Diagnostic parsing (fail-closed)
//! - Task store access and the attempt circuit breaker
//! - LLM API interactions

use thiserror::Error;

/// Errors raised by the container runtime.
///
/// Every variant names the operation that failed and, where one exists, the
/// sandbox or exec identifier it was issued against.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container runtime not available: {0}")]
    Unavailable(String),

    #[error("Failed to create sandbox for {project}/{stack}: {reason}")]
    CreateFailed {
        project: String,
        stack: String,
        reason: String,
    },

    #[error("Failed to start sandbox '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    #[error("Failed to stop sandbox '{id}': {reason}")]
    StopFailed { id: String, reason: String },

    #[error("Failed to remove sandbox '{id}': {reason}")]
    RemoveFailed { id: String, reason: String },

    #[error("Failed to list sandboxes: {0}")]
    ListFailed(String),

    #[error("Failed to create exec in sandbox '{id}': {reason}")]
    ExecCreateFailed { id: String, reason: String },

    #[error("Failed to attach to exec '{id}': {reason}")]
    ExecAttachFailed { id: String, reason: String },

    #[error("Failed to read output of exec '{id}': {reason}")]
    ExecStreamFailed { id: String, reason: String },

    #[error("Failed to inspect exec '{id}': {reason}")]
    ExecInspectFailed { id: String, reason: String },

    #[error("Sandbox '{id}' not found")]
    SandboxNotFound { id: String },
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: MONARCH_LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned no content")]
    EmptyResponse,
}

/// Errors that can occur during judgment-based evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("File size {actual} exceeds limit {limit}")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("git diff failed for '{path}': {reason}")]
    DiffFailed { path: String, reason: String },

    #[error("Judgment backend failed: {0}")]
    Backend(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fail-closed parse error. An unreadable tool report fails the same way
/// whichever tool produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("system failure: tool output malformed")]
    SystemFailure,
}

/// Errors in gate configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Gate #{index} has an empty name")]
    EmptyGateName { index: usize },

    #[error("Gate '{gate}' has unknown type '{kind}': must be 'standard' or 'llm_eval'")]
    UnknownGateType { gate: String, kind: String },

    #[error("Gate '{gate}' is missing required field '{field}'")]
    MissingField { gate: String, field: &'static str },

    #[error("Unknown tool format '{0}': expected 'eslint' or 'go-test'")]
    UnknownToolFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while running a gate or a raw command.
#[derive(Debug, Error)]
pub enum GateError {
    /// The check ran and reported a failing outcome.
    #[error("gate {gate} failed: {detail}")]
    Failed { gate: String, detail: String },

    /// A raw command exited non-zero.
    #[error("execution failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i64, stderr: String },

    #[error("Invalid gate '{gate}': {reason}")]
    InvalidGate { gate: String, reason: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl GateError {
    /// Whether this error is an expected verification outcome rather than a
    /// system fault.
    pub fn is_verification_failure(&self) -> bool {
        match self {
            GateError::Failed { .. } | GateError::CommandFailed { .. } => true,
            GateError::Eval(EvalError::SizeLimitExceeded { .. }) => true,
            _ => false,
        }
    }
}

/// Errors raised by a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Errors raised by the attempt circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("Invalid Task ID format: '{0}'")]
    InvalidTaskId(String),

    #[error("Task {task_id} Blocked after {attempts} attempts. Human intervention required.")]
    Blocked { task_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
