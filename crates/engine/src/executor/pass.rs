use sfsim_types::{StateDefinition, StateType};

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::error::EngineError;
use crate::processor::{process_input_path, process_output_path, process_result_path};

/// Forwards its effective input as its result. `Parameters` are not templated.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassExecutor;

#[async_trait::async_trait]
impl StateExecutor for PassExecutor {
    fn state_type(&self) -> StateType {
        StateType::Pass
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Pass(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };

        let effective = process_input_path(&invocation.input, &state.input_path)?;
        let merged = process_result_path(&invocation.input, effective, &state.result_path)?;
        let output = process_output_path(&merged, &state.output_path)?;
        Ok(StateOutput::from_transition(&state.transition, output))
    }
}
