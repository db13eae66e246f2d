//! Execution lifecycle types streamed to callers while a state machine runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::StateType;

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Control commands accepted by a running execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionControl {
    Cancel,
}

/// Lifecycle events emitted by the execution driver.
///
/// Events from Map items carry the item index path in `map_item` so listeners can tell nested
/// executions apart from the top-level one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: String,
        state_machine: String,
        input: Value,
        at: DateTime<Utc>,
    },
    StateEntered {
        state_name: String,
        state_type: StateType,
        input: Value,
        map_item: Option<usize>,
        at: DateTime<Utc>,
    },
    StateExited {
        state_name: String,
        output: Value,
        map_item: Option<usize>,
        duration_ms: u64,
    },
    ExecutionSucceeded {
        output: Value,
        finished_at: DateTime<Utc>,
    },
    ExecutionFailed {
        error: String,
        cause: Option<String>,
        finished_at: DateTime<Utc>,
    },
    ExecutionCancelled {
        finished_at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Terminal status for completion events, `None` for intermediate ones.
    pub fn terminal_status(&self) -> Option<ExecutionStatus> {
        match self {
            ExecutionEvent::ExecutionSucceeded { .. } => Some(ExecutionStatus::Succeeded),
            ExecutionEvent::ExecutionFailed { .. } => Some(ExecutionStatus::Failed),
            ExecutionEvent::ExecutionCancelled { .. } => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}
