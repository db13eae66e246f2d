use sfsim_types::{StateDefinition, StateType};

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::error::EngineError;

/// Always ends the execution with the state's declared error and cause.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailExecutor;

#[async_trait::async_trait]
impl StateExecutor for FailExecutor {
    fn state_type(&self) -> StateType {
        StateType::Fail
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Fail(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };

        Err(EngineError::StateFailed {
            state_name: invocation.state_name.to_string(),
            error: state.error.clone(),
            cause: state.cause.clone(),
        })
    }
}
