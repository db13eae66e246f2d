//! Simulator: registered state machines plus the services executions run with.
//!
//! [`Simulator::start_execution`] spawns the execution on the tokio runtime and returns an
//! [`ExecutionHandle`] that exposes the lifecycle event stream, cancellation and the final result.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use sfsim_types::{ExecutionEvent, StateMachineDefinition, validate_state_machine};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    cancel::{CancelHandle, CancelSignal},
    context::ExecutionContext,
    driver::ExecutionDriver,
    error::EngineError,
    services::EngineServices,
    tokens::TaskTokens,
};

#[derive(Debug, Clone)]
pub struct Simulator {
    services: EngineServices,
    state_machines: IndexMap<String, Arc<StateMachineDefinition>>,
}

impl Simulator {
    pub fn new(services: EngineServices) -> Self {
        Self {
            services,
            state_machines: IndexMap::new(),
        }
    }

    /// Validates and registers `definition` under `name`, replacing any previous registration.
    pub fn register_state_machine(&mut self, name: impl Into<String>, definition: StateMachineDefinition) -> Result<(), EngineError> {
        let name = name.into();
        validate_state_machine(&definition)?;
        info!(state_machine = %name, states = definition.states.len(), "registered state machine");
        self.state_machines.insert(name, Arc::new(definition));
        Ok(())
    }

    /// Registered names in registration order.
    pub fn state_machine_names(&self) -> Vec<&str> {
        self.state_machines.keys().map(String::as_str).collect()
    }

    pub fn state_machine(&self, name: &str) -> Option<&StateMachineDefinition> {
        self.state_machines.get(name).map(Arc::as_ref)
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Registry used to complete callback tasks of running executions.
    pub fn task_tokens(&self) -> &TaskTokens {
        &self.services.task_tokens
    }

    /// Starts an execution of `name` with `input`.
    ///
    /// Must be called within a tokio runtime. A `TimeoutSeconds` on the definition bounds the whole
    /// execution.
    pub fn start_execution(&self, name: &str, input: Value) -> Result<ExecutionHandle, EngineError> {
        let definition = self
            .state_machines
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStateMachine { name: name.to_string() })?;

        let execution = Arc::new(ExecutionContext::new(name, input.clone()));
        let execution_id = execution.execution_id.clone();
        let (cancel, signal) = CancelSignal::new();
        let (events_tx, events_rx) = unbounded_channel();
        let driver = ExecutionDriver::new(self.services.clone(), Arc::clone(&execution), signal).with_events(events_tx.clone());

        info!(state_machine = name, execution_id = %execution_id, "starting execution");
        let task = tokio::spawn(run_execution(driver, definition, input, events_tx));

        Ok(ExecutionHandle {
            execution_id,
            cancel,
            events: Some(events_rx),
            task,
        })
    }

    /// Runs an execution to completion.
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value, EngineError> {
        self.start_execution(name, input)?.wait().await
    }
}

async fn run_execution(
    driver: ExecutionDriver,
    definition: Arc<StateMachineDefinition>,
    input: Value,
    events: UnboundedSender<ExecutionEvent>,
) -> Result<Value, EngineError> {
    let execution = driver.execution();
    let _ = events.send(ExecutionEvent::ExecutionStarted {
        execution_id: execution.execution_id.clone(),
        state_machine: execution.state_machine_name().to_string(),
        input: input.clone(),
        at: Utc::now(),
    });

    let run = driver.run(&definition, input);
    let outcome = match definition.timeout_seconds {
        Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), run)
            .await
            .unwrap_or(Err(EngineError::ExecutionTimedOut { seconds })),
        None => run.await,
    };

    let finished_at = Utc::now();
    let execution_id = &execution.execution_id;
    let event = match &outcome {
        Ok(output) => {
            info!(execution_id = %execution_id, "execution succeeded");
            ExecutionEvent::ExecutionSucceeded {
                output: output.clone(),
                finished_at,
            }
        }
        Err(EngineError::Cancelled) => {
            info!(execution_id = %execution_id, "execution cancelled");
            ExecutionEvent::ExecutionCancelled { finished_at }
        }
        Err(error) => {
            warn!(execution_id = %execution_id, error = %error, "execution failed");
            ExecutionEvent::ExecutionFailed {
                error: error.error_name(),
                cause: error.failure_cause(),
                finished_at,
            }
        }
    };
    let _ = events.send(event);
    outcome
}

/// Handle to a running execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: String,
    cancel: CancelHandle,
    events: Option<UnboundedReceiver<ExecutionEvent>>,
    task: JoinHandle<Result<Value, EngineError>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Requests cancellation. The execution stops at its next state boundary, Wait or callback wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel this execution after the handle itself has been consumed by `wait`.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Takes the lifecycle event stream; `None` once taken.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<ExecutionEvent>> {
        self.events.take()
    }

    /// Waits for the final payload or the failure that ended the execution.
    pub async fn wait(self) -> Result<Value, EngineError> {
        self.task
            .await
            .map_err(|error| EngineError::ExecutionAborted(error.to_string()))?
    }
}
