use sfsim_types::{StateDefinition, StateType};
use tracing::debug;

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::condition;
use crate::error::EngineError;
use crate::processor::{process_input_path, process_output_path};

/// Picks the next state from the first matching rule, falling back to `Default`.
///
/// The effective input is forwarded to the chosen branch; Choice has no `ResultPath`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChoiceExecutor;

#[async_trait::async_trait]
impl StateExecutor for ChoiceExecutor {
    fn state_type(&self) -> StateType {
        StateType::Choice
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Choice(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };

        let effective = process_input_path(&invocation.input, &state.input_path)?;
        let mut next = None;
        for (index, rule) in state.choices.iter().enumerate() {
            if condition::evaluate(rule, &effective, invocation.context.as_value())? {
                debug!(state = invocation.state_name, rule = index, "choice rule matched");
                next = rule.next.clone();
                break;
            }
        }

        let next = next.or_else(|| state.default.clone()).ok_or_else(|| EngineError::NoMatchingChoice {
            state_name: invocation.state_name.to_string(),
        })?;
        let output = process_output_path(&effective, &state.output_path)?;
        Ok(StateOutput::next(next, output))
    }
}
