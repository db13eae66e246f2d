//! Amazon States Language definition model.
//!
//! State machines are deserialized straight from the authoring document (JSON or YAML) using the
//! PascalCase field names of the language. Every state is a variant of the closed
//! [`StateDefinition`] sum type tagged by its `Type` field, and each variant carries only the fields
//! that type understands. State order is preserved (via `IndexMap`) so listings and validation
//! messages follow authoring order.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::choice::ChoiceRule;

/// Resource suffix selecting the callback (task token) flavour of a Task state.
pub const WAIT_FOR_TASK_TOKEN_SUFFIX: &str = ".waitForTaskToken";

/// A complete state machine: a named graph of states with a single entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachineDefinition {
    /// Free-form author comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Name of the first state to run.
    pub start_at: String,
    /// States keyed by name, in authoring order.
    pub states: IndexMap<String, StateDefinition>,
    /// Overall execution deadline in seconds, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl StateMachineDefinition {
    /// Looks up a state by name.
    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }
}

/// Type tag of a state, used as the dispatch key of the executor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    Pass,
    Task,
    Wait,
    Choice,
    Fail,
    Succeed,
    Map,
    Parallel,
}

impl StateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Pass => "Pass",
            StateType::Task => "Task",
            StateType::Wait => "Wait",
            StateType::Choice => "Choice",
            StateType::Fail => "Fail",
            StateType::Succeed => "Succeed",
            StateType::Map => "Map",
            StateType::Parallel => "Parallel",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the state machine graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "Type")]
pub enum StateDefinition {
    Pass(PassState),
    Task(TaskState),
    Wait(WaitState),
    Choice(ChoiceState),
    Fail(FailState),
    Succeed(SucceedState),
    Map(MapState),
    /// Parsed so definitions load, but no executor runs it.
    Parallel(ParallelState),
}

impl StateDefinition {
    /// Returns the type tag of this state.
    pub fn state_type(&self) -> StateType {
        match self {
            StateDefinition::Pass(_) => StateType::Pass,
            StateDefinition::Task(_) => StateType::Task,
            StateDefinition::Wait(_) => StateType::Wait,
            StateDefinition::Choice(_) => StateType::Choice,
            StateDefinition::Fail(_) => StateType::Fail,
            StateDefinition::Succeed(_) => StateType::Succeed,
            StateDefinition::Map(_) => StateType::Map,
            StateDefinition::Parallel(_) => StateType::Parallel,
        }
    }

    /// Returns the `Next`/`End` pair for state types that carry one.
    ///
    /// Choice, Fail and Succeed decide their own transition and return `None`.
    pub fn transition(&self) -> Option<&Transition> {
        match self {
            StateDefinition::Pass(state) => Some(&state.transition),
            StateDefinition::Task(state) => Some(&state.transition),
            StateDefinition::Wait(state) => Some(&state.transition),
            StateDefinition::Map(state) => Some(&state.transition),
            StateDefinition::Parallel(state) => Some(&state.transition),
            StateDefinition::Choice(_) | StateDefinition::Fail(_) | StateDefinition::Succeed(_) => None,
        }
    }
}

/// A path field that distinguishes "not configured" from an explicit JSON `null`.
///
/// `InputPath`, `OutputPath` and `ResultPath` treat the two cases differently: an absent field
/// passes the document through, while `null` selects an empty object (or, for `ResultPath`,
/// discards the state result).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum JsonPathField {
    #[default]
    Absent,
    Null,
    Path(String),
}

impl JsonPathField {
    pub fn is_absent(&self) -> bool {
        matches!(self, JsonPathField::Absent)
    }

    pub fn path(expression: impl Into<String>) -> Self {
        JsonPathField::Path(expression.into())
    }
}

impl<'de> Deserialize<'de> for JsonPathField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(expression) => JsonPathField::Path(expression),
            None => JsonPathField::Null,
        })
    }
}

impl Serialize for JsonPathField {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            JsonPathField::Absent | JsonPathField::Null => serializer.serialize_none(),
            JsonPathField::Path(expression) => serializer.serialize_str(expression),
        }
    }
}

/// `Next`/`End` pair shared by non-terminal state types.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
}

impl Transition {
    pub fn next(state_name: impl Into<String>) -> Self {
        Self {
            next: Some(state_name.into()),
            end: false,
        }
    }

    pub fn end() -> Self {
        Self { next: None, end: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub input_path: JsonPathField,
    /// Accepted for compatibility; Pass does not apply parameter templating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub result_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub output_path: JsonPathField,
    #[serde(flatten)]
    pub transition: Transition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Identifier of the backing function or service integration.
    pub resource: String,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub input_path: JsonPathField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub result_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub output_path: JsonPathField,
    /// Upper bound for the invocation, including any callback wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(flatten)]
    pub transition: Transition,
}

impl TaskState {
    /// True when the task waits for an external completion signal carrying its task token.
    pub fn waits_for_task_token(&self) -> bool {
        self.resource.ends_with(WAIT_FOR_TASK_TOKEN_SUFFIX)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,
    /// RFC 3339 timestamp to wait until.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_path: Option<String>,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub input_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub output_path: JsonPathField,
    #[serde(flatten)]
    pub transition: Transition,
}

/// Resolved form of a Wait state's delay field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitDelay<'a> {
    Seconds(u64),
    SecondsPath(&'a str),
    Timestamp(&'a str),
    TimestampPath(&'a str),
}

impl WaitState {
    /// Returns every configured delay field; a valid state has exactly one.
    pub fn delays(&self) -> Vec<WaitDelay<'_>> {
        let mut delays = Vec::new();
        if let Some(seconds) = self.seconds {
            delays.push(WaitDelay::Seconds(seconds));
        }
        if let Some(path) = self.seconds_path.as_deref() {
            delays.push(WaitDelay::SecondsPath(path));
        }
        if let Some(timestamp) = self.timestamp.as_deref() {
            delays.push(WaitDelay::Timestamp(timestamp));
        }
        if let Some(path) = self.timestamp_path.as_deref() {
            delays.push(WaitDelay::TimestampPath(path));
        }
        delays
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Ordered rules; the first match decides the next state.
    pub choices: Vec<ChoiceRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub input_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub output_path: JsonPathField,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub input_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub output_path: JsonPathField,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Location of the array to iterate; defaults to the whole effective input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_processor: Option<StateMachineDefinition>,
    /// Legacy spelling of `ItemProcessor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator: Option<StateMachineDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_selector: Option<Value>,
    /// Legacy spelling of `ItemSelector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Upper bound on items in flight; 0 leaves the choice to the engine.
    #[serde(default)]
    pub max_concurrency: u32,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub input_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub result_path: JsonPathField,
    #[serde(default, skip_serializing_if = "JsonPathField::is_absent")]
    pub output_path: JsonPathField,
    #[serde(flatten)]
    pub transition: Transition,
}

impl MapState {
    /// The nested state machine run once per item.
    pub fn processor(&self) -> Option<&StateMachineDefinition> {
        self.item_processor.as_ref().or(self.iterator.as_ref())
    }

    /// The per-item payload template, if any.
    pub fn item_template(&self) -> Option<&Value> {
        self.item_selector.as_ref().or(self.parameters.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub branches: Vec<Value>,
    #[serde(flatten)]
    pub transition: Transition,
}
