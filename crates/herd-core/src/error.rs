use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias for `Result<T, HerdError>`.
pub type HerdResult<T> = Result<T, HerdError>;

/// Top-level error type shared by every herd crate.
///
/// Each variant corresponds to one failure class of the dispatch engine:
/// unknown identifiers, unsatisfied dependencies, unroutable queries,
/// endpoint communication, and failures raised inside tool handlers.
#[derive(Error, Debug)]
pub enum HerdError {
    /// No handler is registered under the requested tool id.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No model configuration exists under the requested id.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// No task record exists under the requested id.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A declared dependency of the tool is not registered.
    #[error("Tool {tool_id} missing dependencies: {}", .missing.join(", "))]
    Dependency {
        /// Tool whose dependencies were checked.
        tool_id: String,
        /// Dependencies that are currently unregistered.
        missing: Vec<String>,
    },

    /// A natural-language query could not be resolved to any tool.
    #[error("Routing error: {0}")]
    Routing(String),

    /// A model endpoint could not be reached or kept failing after retries.
    #[error("Communication error: {0}")]
    Communication(String),

    /// A tool handler failed while executing.
    #[error("Handler error: {0}")]
    Handler(String),

    /// An attempt exceeded its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid task lifecycle operation.
    #[error("Task error: {0}")]
    Task(String),

    /// Configuration could not be read, parsed or written.
    #[error("Config error: {0}")]
    Config(String),

    /// Payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HerdError {
    /// Shorthand for a handler failure carrying any displayable cause.
    pub fn handler(cause: impl std::fmt::Display) -> Self {
        HerdError::Handler(cause.to_string())
    }

    /// Handler failure built from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        match detail {
            Some(detail) => HerdError::Handler(format!("panicked: {detail}")),
            None => HerdError::Handler("panicked".to_string()),
        }
    }
}

/// Coarse classification of a failed tool execution.
///
/// Lets callers tell a bad request (unknown tool, unmet dependency) apart from
/// a failure inside the handler without parsing the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The tool is not registered.
    NotFound,
    /// A declared dependency is missing.
    Dependency,
    /// The attempt ran out of time.
    Timeout,
    /// The handler itself failed.
    Handler,
}

impl From<&HerdError> for ToolErrorKind {
    fn from(err: &HerdError) -> Self {
        match err {
            HerdError::ToolNotFound(_) | HerdError::ModelNotFound(_) => ToolErrorKind::NotFound,
            HerdError::Dependency { .. } => ToolErrorKind::Dependency,
            HerdError::Timeout(_) => ToolErrorKind::Timeout,
            _ => ToolErrorKind::Handler,
        }
    }
}
