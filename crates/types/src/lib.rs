//! # sfsim types
//!
//! Serde model of Amazon States Language state machines together with the small set of types the
//! engine and CLI exchange: function bindings, execution lifecycle events and definition
//! validation.

pub mod binding;
pub mod choice;
pub mod definition;
pub mod execution;
pub mod validation;

pub use binding::FunctionBinding;
pub use choice::{ChoiceRule, ChoiceRuleError, Comparison, Operand, Relation, TypeTest, ValueKind};
pub use definition::{
    ChoiceState, FailState, JsonPathField, MapState, ParallelState, PassState, StateDefinition, StateMachineDefinition, StateType,
    SucceedState, TaskState, Transition, WAIT_FOR_TASK_TOKEN_SUFFIX, WaitDelay, WaitState,
};
pub use execution::{ExecutionControl, ExecutionEvent, ExecutionStatus};
pub use validation::{ValidationErrors, validate_state_machine};
