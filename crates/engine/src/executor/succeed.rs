use sfsim_types::{StateDefinition, StateType};

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::error::EngineError;
use crate::processor::{process_input_path, process_output_path};

#[derive(Debug, Clone, Copy, Default)]
pub struct SucceedExecutor;

#[async_trait::async_trait]
impl StateExecutor for SucceedExecutor {
    fn state_type(&self) -> StateType {
        StateType::Succeed
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Succeed(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };

        let effective = process_input_path(&invocation.input, &state.input_path)?;
        Ok(StateOutput::terminal(process_output_path(&effective, &state.output_path)?))
    }
}
