//! State-type executors.
//!
//! Each executor implements one state type's behaviour: it composes the data-flow stages around its
//! own logic and returns a [`StateOutput`] telling the driver where to go next. Executors are looked
//! up by [`StateType`] through the [`ExecutorRegistry`].
//!
//! - `pass`, `succeed`, `fail`: payload shaping and terminal states
//! - `task`: function invocation, plain and callback (task token) flavours
//! - `wait`: fixed, path-derived or timestamp delays
//! - `choice`: first matching rule selects the next state
//! - `map`: runs a nested state machine once per item through the driver

use serde_json::Value;
use sfsim_types::{StateDefinition, StateType, Transition};

use crate::{context::ContextObject, driver::ExecutionDriver, error::EngineError};

mod choice;
mod fail;
mod map;
mod pass;
mod registry;
mod succeed;
mod task;
mod wait;

pub use choice::ChoiceExecutor;
pub use fail::FailExecutor;
pub use map::MapExecutor;
pub use pass::PassExecutor;
pub use registry::ExecutorRegistry;
pub use succeed::SucceedExecutor;
pub use task::TaskExecutor;
pub use wait::WaitExecutor;

/// Everything an executor receives for one state invocation.
pub struct StateInvocation<'a> {
    pub state_machine: &'a str,
    pub state_name: &'a str,
    pub state: &'a StateDefinition,
    /// Raw state input, before `InputPath`.
    pub input: Value,
    pub context: ContextObject,
    /// The driver running this state; Map re-enters it for items.
    pub driver: &'a ExecutionDriver,
}

impl StateInvocation<'_> {
    /// Error for a state handed to an executor of another type.
    pub(crate) fn type_mismatch(&self) -> EngineError {
        EngineError::UnsupportedStateType {
            state_type: self.state.state_type().to_string(),
        }
    }
}

/// Transition decision and payload produced by one state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateOutput {
    pub next: Option<String>,
    pub terminal: bool,
    pub payload: Value,
}

impl StateOutput {
    /// Follows a `Next`/`End` pair. A transition without `Next` ends the execution.
    pub fn from_transition(transition: &Transition, payload: Value) -> Self {
        Self {
            next: transition.next.clone(),
            terminal: transition.end || transition.next.is_none(),
            payload,
        }
    }

    pub fn terminal(payload: Value) -> Self {
        Self {
            next: None,
            terminal: true,
            payload,
        }
    }

    pub fn next(state_name: impl Into<String>, payload: Value) -> Self {
        Self {
            next: Some(state_name.into()),
            terminal: false,
            payload,
        }
    }
}

/// Behaviour of one state type.
#[async_trait::async_trait]
pub trait StateExecutor: Send + Sync {
    /// The state type this executor runs.
    fn state_type(&self) -> StateType;

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError>;
}
