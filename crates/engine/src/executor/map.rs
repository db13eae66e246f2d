use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use sfsim_types::{StateDefinition, StateType, ValidationErrors};
use tracing::{debug, info};

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::error::EngineError;
use crate::path;
use crate::processor::{process_input_path, process_output_path, process_parameters, process_result_path};

/// Runs the item processor once per element of the items array.
///
/// Items run concurrently up to `MaxConcurrency` (or the engine default when it is 0), each in its
/// own nested driver frame. Results keep input order. The first failing item fails the state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapExecutor;

#[async_trait::async_trait]
impl StateExecutor for MapExecutor {
    fn state_type(&self) -> StateType {
        StateType::Map
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Map(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };
        let state_name = invocation.state_name;
        let processor = state.processor().ok_or_else(|| {
            EngineError::InvalidDefinition(ValidationErrors {
                violations: vec![format!("state '{state_name}' must declare ItemProcessor or Iterator")],
            })
        })?;

        let effective = process_input_path(&invocation.input, &state.input_path)?;
        let items = match state.items_path.as_deref() {
            Some(expression) => path::resolve_payload(&effective, expression)?,
            None => effective.clone(),
        };
        let items = match items {
            Value::Array(items) => items,
            other => {
                return Err(EngineError::InvalidMapItems {
                    state_name: state_name.to_string(),
                    found: path::json_type_name(&other),
                });
            }
        };

        let limit = match state.max_concurrency {
            0 => invocation.driver.services().default_map_concurrency,
            declared => declared as usize,
        }
        .max(1);
        info!(state = state_name, items = items.len(), concurrency = limit, "running map items");

        let driver = invocation.driver;
        let template = state.item_template();
        let effective_ref = &effective;
        let context = &invocation.context;
        let results: Vec<Value> = stream::iter(items.into_iter().enumerate().map(move |(index, item)| async move {
            let item_context = context.clone().with_map_item(index, &item);
            let item_input = match template {
                Some(template) => process_parameters(effective_ref, Some(template), item_context.as_value()),
                None => Ok(item),
            };
            let outcome = match item_input {
                Ok(item_input) => driver.for_map_item(index).run(processor, item_input).await,
                Err(error) => Err(error),
            };
            outcome.map_err(|error| match error {
                EngineError::Cancelled => EngineError::Cancelled,
                source => EngineError::MapItemFailed {
                    state_name: state_name.to_string(),
                    index,
                    source: Box::new(source),
                },
            })
        }))
        .buffered(limit)
        .try_collect()
        .await?;
        debug!(state = state_name, items = results.len(), "map items completed");

        let merged = process_result_path(&invocation.input, Value::Array(results), &state.result_path)?;
        let output = process_output_path(&merged, &state.output_path)?;
        Ok(StateOutput::from_transition(&state.transition, output))
    }
}
