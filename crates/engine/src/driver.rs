//! Execution driver: walks a state machine one state at a time.
//!
//! The driver owns the execution frame (current state name and payload), dispatches each state to
//! its executor and follows the returned transition until a terminal state is reached or an error
//! surfaces. Map items re-enter the driver through [`ExecutionDriver::for_map_item`], so every item
//! runs in an independent frame that shares nothing mutable with its siblings or the parent.

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use serde_json::Value;
use sfsim_types::{ExecutionEvent, StateMachineDefinition};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::{
    cancel::CancelSignal,
    context::ExecutionContext,
    error::EngineError,
    executor::StateInvocation,
    services::EngineServices,
};

/// Working state of one (possibly nested) run.
#[derive(Debug)]
struct Frame {
    state_name: String,
    payload: Value,
}

#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    services: EngineServices,
    execution: Arc<ExecutionContext>,
    cancel: CancelSignal,
    events: Option<UnboundedSender<ExecutionEvent>>,
    map_item: Option<usize>,
}

impl ExecutionDriver {
    pub fn new(services: EngineServices, execution: Arc<ExecutionContext>, cancel: CancelSignal) -> Self {
        Self {
            services,
            execution,
            cancel,
            events: None,
            map_item: None,
        }
    }

    /// Streams state lifecycle events to `events`. A closed receiver silently stops the stream.
    pub fn with_events(mut self, events: UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Driver for one Map item: same execution, services and cancellation, fresh frame.
    pub fn for_map_item(&self, index: usize) -> Self {
        Self {
            map_item: Some(index),
            ..self.clone()
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Runs `definition` from its `StartAt` state and returns the final payload.
    pub async fn run(&self, definition: &StateMachineDefinition, input: Value) -> Result<Value, EngineError> {
        let state_machine = self.execution.state_machine_name();
        let mut frame = Frame {
            state_name: definition.start_at.clone(),
            payload: input,
        };

        loop {
            self.ensure_active()?;
            let state = definition.state(&frame.state_name).ok_or_else(|| EngineError::StateNotFound {
                state_name: frame.state_name.clone(),
            })?;
            let state_type = state.state_type();
            let executor = self.services.executors.get_executor(state_type)?;

            debug!(
                state_machine,
                state = %frame.state_name,
                state_type = %state_type,
                map_item = ?self.map_item,
                "entering state"
            );
            self.emit(|| ExecutionEvent::StateEntered {
                state_name: frame.state_name.clone(),
                state_type,
                input: frame.payload.clone(),
                map_item: self.map_item,
                at: Utc::now(),
            });

            let started_at = Instant::now();
            let invocation = StateInvocation {
                state_machine,
                state_name: &frame.state_name,
                state,
                input: frame.payload,
                context: self.execution.context_for_state(&frame.state_name),
                driver: self,
            };
            let output = match executor.execute(invocation).await {
                Ok(output) => output,
                Err(error) => {
                    warn!(state_machine, state = %frame.state_name, error = %error, "state failed");
                    return Err(error);
                }
            };
            // a result that arrives after cancellation is discarded
            self.ensure_active()?;

            let duration_ms = started_at.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
            self.emit(|| ExecutionEvent::StateExited {
                state_name: frame.state_name.clone(),
                output: output.payload.clone(),
                map_item: self.map_item,
                duration_ms,
            });

            match output.next {
                Some(next) if !output.terminal => {
                    frame = Frame {
                        state_name: next,
                        payload: output.payload,
                    };
                }
                _ => {
                    debug!(state_machine, state = %frame.state_name, "reached terminal state");
                    return Ok(output.payload);
                }
            }
        }
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, event: impl FnOnce() -> ExecutionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event());
        }
    }
}
