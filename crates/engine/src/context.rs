//! Context object exposed to path expressions through `$$`.
//!
//! The execution-wide part (`Execution`, `StateMachine`) is fixed when an execution starts; the
//! `State`, `Task` and `Map` parts are layered on per state invocation. Context objects are plain
//! JSON values and are never merged into the payload.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

/// Prefix of the ARN-like ids given to locally registered state machines.
pub const STATE_MACHINE_ARN_PREFIX: &str = "arn:aws:states:local:000000000000:stateMachine:";

/// Builds the id of a locally registered state machine.
pub fn state_machine_arn(name: &str) -> String {
    format!("{STATE_MACHINE_ARN_PREFIX}{name}")
}

/// Derives a state machine name from its id (the last `:` separated segment).
pub fn state_machine_name_from_id(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}

/// Execution-wide metadata shared by every state of one run, Map items included.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub execution_name: String,
    pub state_machine_id: String,
    pub input: Value,
    pub start_time: DateTime<Utc>,
}

impl ExecutionContext {
    /// Starts a new execution of `state_machine` with a random execution name.
    pub fn new(state_machine: &str, input: Value) -> Self {
        let execution_name = Uuid::new_v4().to_string();
        let state_machine_id = state_machine_arn(state_machine);
        Self {
            execution_id: format!("arn:aws:states:local:000000000000:execution:{state_machine}:{execution_name}"),
            execution_name,
            state_machine_id,
            input,
            start_time: Utc::now(),
        }
    }

    pub fn state_machine_name(&self) -> &str {
        state_machine_name_from_id(&self.state_machine_id)
    }

    /// Context object for one state invocation.
    pub fn context_for_state(&self, state_name: &str) -> ContextObject {
        ContextObject(json!({
            "Execution": {
                "Id": self.execution_id,
                "Name": self.execution_name,
                "Input": self.input,
                "StartTime": timestamp(self.start_time),
            },
            "StateMachine": {
                "Id": self.state_machine_id,
                "Name": self.state_machine_name(),
            },
            "State": {
                "Name": state_name,
                "EnteredTime": timestamp(Utc::now()),
            },
        }))
    }
}

/// The `$$` document of one state invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextObject(Value);

impl ContextObject {
    pub fn with_task_token(mut self, token: &str) -> Self {
        self.0["Task"] = json!({ "Token": token });
        self
    }

    pub fn with_map_item(mut self, index: usize, value: &Value) -> Self {
        self.0["Map"] = json!({ "Item": { "Index": index, "Value": value } });
        self
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
