//! Engine error kinds.
//!
//! Every failure an execution can end with is a variant here; nothing is swallowed. Errors carry the
//! state (and, for Map items, the item index) they were raised in so callers can diagnose a run
//! without replaying it.

use sfsim_types::ValidationErrors;
use thiserror::Error;

/// Errors surfaced by path resolution, the data-flow stages, executors and the driver.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A path expression named a field that is absent or not traversable.
    #[error("path '{path}' did not match any value")]
    PathNotFound { path: String },

    /// A path expression uses syntax outside root and dotted-field references.
    #[error("unsupported path expression '{expression}': {reason}")]
    UnsupportedExpression { expression: String, reason: String },

    #[error("The field '{field}' is required but was missing")]
    MissingRequiredField { field: String },

    #[error("The field \"{field}\" is not supported by Step Functions")]
    UnsupportedField { field: String },

    #[error("no function is bound to state '{state_name}' of state machine '{state_machine}'")]
    HandlerNotFound { state_machine: String, state_name: String },

    #[error("task state '{state_name}' failed: {message}")]
    TaskExecutionFailed { state_name: String, message: String },

    #[error("task state '{state_name}' timed out after {seconds}s")]
    TaskTimedOut { state_name: String, seconds: u64 },

    #[error("choice state '{state_name}' matched no rule and has no Default")]
    NoMatchingChoice { state_name: String },

    #[error("State of Type \"{state_type}\" is not supported yet.")]
    UnsupportedStateType { state_type: String },

    #[error("map state '{state_name}' failed on item {index}: {source}")]
    MapItemFailed {
        state_name: String,
        index: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("map state '{state_name}' expected an array of items but found {found}")]
    InvalidMapItems { state_name: String, found: &'static str },

    #[error("wait state '{state_name}' has an invalid delay: {reason}")]
    InvalidWaitValue { state_name: String, reason: String },

    /// A Fail state was reached.
    #[error("{}{}", .error.as_deref().unwrap_or("States.Fail"), .cause.as_deref().map(|cause| format!(": {cause}")).unwrap_or_default())]
    StateFailed {
        state_name: String,
        error: Option<String>,
        cause: Option<String>,
    },

    #[error("state '{state_name}' does not exist")]
    StateNotFound { state_name: String },

    #[error(transparent)]
    InvalidDefinition(#[from] ValidationErrors),

    #[error("state machine '{name}' is not registered")]
    UnknownStateMachine { name: String },

    #[error("task token '{token}' is unknown or already completed")]
    UnknownTaskToken { token: String },

    #[error("execution exceeded its {seconds}s timeout")]
    ExecutionTimedOut { seconds: u64 },

    #[error("execution was cancelled")]
    Cancelled,

    /// The execution task ended without producing a result (for example, it panicked).
    #[error("execution aborted: {0}")]
    ExecutionAborted(String),
}

impl EngineError {
    /// Error name reported in execution events, following the `States.*` naming of the language.
    ///
    /// Fail states report their own declared error.
    pub fn error_name(&self) -> String {
        match self {
            EngineError::StateFailed { error, .. } => error.clone().unwrap_or_else(|| "States.Fail".to_string()),
            EngineError::TaskExecutionFailed { .. } | EngineError::HandlerNotFound { .. } => "States.TaskFailed".to_string(),
            EngineError::TaskTimedOut { .. } | EngineError::ExecutionTimedOut { .. } => "States.Timeout".to_string(),
            EngineError::NoMatchingChoice { .. } => "States.NoChoiceMatched".to_string(),
            EngineError::MapItemFailed { source, .. } => source.error_name(),
            EngineError::Cancelled => "States.Cancelled".to_string(),
            _ => "States.Runtime".to_string(),
        }
    }

    /// Human readable cause paired with [`error_name`](Self::error_name).
    pub fn failure_cause(&self) -> Option<String> {
        match self {
            EngineError::StateFailed { cause, .. } => cause.clone(),
            other => Some(other.to_string()),
        }
    }
}
