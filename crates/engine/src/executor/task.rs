use std::{future::Future, time::Duration};

use serde_json::{Map, Value};
use sfsim_types::{FunctionBinding, StateDefinition, StateType, TaskState};
use tracing::{debug, warn};

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::error::EngineError;
use crate::processor::{process_input_path, process_output_path, process_parameters, process_result_path, process_wait_for_token_parameters};
use crate::tokens::{TaskCompletion, TaskTokens};

/// Invokes the function bound to the state and merges its result into the state input.
///
/// Resources ending in `.waitForTaskToken` issue a task token, invoke the function with the processed
/// `Payload` and then wait for the token to be completed externally.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskExecutor;

#[async_trait::async_trait]
impl StateExecutor for TaskExecutor {
    fn state_type(&self) -> StateType {
        StateType::Task
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Task(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };

        let effective = process_input_path(&invocation.input, &state.input_path)?;
        let binding = invocation
            .driver
            .services()
            .bindings
            .lookup(invocation.state_machine, invocation.state_name)
            .cloned()
            .ok_or_else(|| EngineError::HandlerNotFound {
                state_machine: invocation.state_machine.to_string(),
                state_name: invocation.state_name.to_string(),
            })?;

        let result = if state.waits_for_task_token() {
            with_timeout(state, invocation.state_name, invoke_with_callback(&invocation, state, &binding, &effective)).await?
        } else {
            with_timeout(state, invocation.state_name, invoke_plain(&invocation, state, &binding, &effective)).await?
        };

        let result = if result.is_null() { Value::Object(Map::new()) } else { result };
        let merged = process_result_path(&invocation.input, result, &state.result_path)?;
        let output = process_output_path(&merged, &state.output_path)?;
        Ok(StateOutput::from_transition(&state.transition, output))
    }
}

async fn with_timeout<F>(state: &TaskState, state_name: &str, invocation: F) -> Result<Value, EngineError>
where
    F: Future<Output = Result<Value, EngineError>>,
{
    let Some(seconds) = state.timeout_seconds else {
        return invocation.await;
    };
    tokio::time::timeout(Duration::from_secs(seconds), invocation)
        .await
        .map_err(|_| EngineError::TaskTimedOut {
            state_name: state_name.to_string(),
            seconds,
        })?
}

async fn invoke_plain(invocation: &StateInvocation<'_>, state: &TaskState, binding: &FunctionBinding, effective: &Value) -> Result<Value, EngineError> {
    let parameters = process_parameters(effective, state.parameters.as_ref(), invocation.context.as_value())?;
    debug!(state = invocation.state_name, handler = %binding, "invoking task function");
    invocation
        .driver
        .services()
        .invoker
        .invoke(binding, parameters, invocation.context.clone().into_value())
        .await
        .map_err(|error| task_failed(invocation.state_name, format!("{error:#}")))
}

async fn invoke_with_callback(
    invocation: &StateInvocation<'_>,
    state: &TaskState,
    binding: &FunctionBinding,
    effective: &Value,
) -> Result<Value, EngineError> {
    let services = invocation.driver.services();
    let (token, completion) = services.task_tokens.issue();
    let _registration = TokenRegistration {
        tokens: &services.task_tokens,
        token: &token,
    };

    let context = invocation.context.clone().with_task_token(&token);
    let payload = process_wait_for_token_parameters(effective, state.parameters.as_ref(), context.as_value())?;
    debug!(state = invocation.state_name, handler = %binding, token = %token, "invoking callback task function");
    let immediate = services
        .invoker
        .invoke(binding, payload, context.into_value())
        .await
        .map_err(|error| task_failed(invocation.state_name, format!("{error:#}")))?;
    debug!(state = invocation.state_name, response = %immediate, "callback function returned; waiting for task token");

    let cancel = invocation.driver.cancel_signal();
    let completion = tokio::select! {
        completion = completion => completion,
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
    };

    match completion {
        Ok(TaskCompletion::Success(output)) => Ok(output),
        Ok(TaskCompletion::Failure { error, cause }) => {
            warn!(state = invocation.state_name, error = %error, "task token reported failure");
            let message = match cause {
                Some(cause) => format!("{error}: {cause}"),
                None => error,
            };
            Err(task_failed(invocation.state_name, message))
        }
        Err(_) => Err(task_failed(invocation.state_name, format!("task token '{token}' was revoked"))),
    }
}

fn task_failed(state_name: &str, message: String) -> EngineError {
    EngineError::TaskExecutionFailed {
        state_name: state_name.to_string(),
        message,
    }
}

/// Revokes a task token when its task stops waiting, whatever the reason.
struct TokenRegistration<'a> {
    tokens: &'a TaskTokens,
    token: &'a str,
}

impl Drop for TokenRegistration<'_> {
    fn drop(&mut self) {
        self.tokens.revoke(self.token);
    }
}
