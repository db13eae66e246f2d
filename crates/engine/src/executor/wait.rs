use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sfsim_types::{StateDefinition, StateType, WaitDelay, WaitState};
use tracing::debug;

use super::{StateExecutor, StateInvocation, StateOutput};
use crate::error::EngineError;
use crate::path;
use crate::processor::{process_input_path, process_output_path};

/// Suspends the execution, then forwards the effective input unchanged.
///
/// The delay goes through the configured [`Sleeper`](crate::Sleeper) and is cut short by
/// cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitExecutor;

#[async_trait::async_trait]
impl StateExecutor for WaitExecutor {
    fn state_type(&self) -> StateType {
        StateType::Wait
    }

    async fn execute(&self, invocation: StateInvocation<'_>) -> Result<StateOutput, EngineError> {
        let StateDefinition::Wait(state) = invocation.state else {
            return Err(invocation.type_mismatch());
        };

        let effective = process_input_path(&invocation.input, &state.input_path)?;
        let delay = wait_duration(invocation.state_name, state, &effective, Utc::now())?;
        debug!(state = invocation.state_name, delay_ms = delay.as_millis() as u64, "waiting");

        let sleeper = &invocation.driver.services().sleeper;
        let cancel = invocation.driver.cancel_signal();
        tokio::select! {
            _ = sleeper.sleep(delay) => {}
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        }

        let output = process_output_path(&effective, &state.output_path)?;
        Ok(StateOutput::from_transition(&state.transition, output))
    }
}

/// Computes how long a Wait state suspends, relative to `now` for timestamps.
pub(crate) fn wait_duration(state_name: &str, state: &WaitState, effective: &Value, now: DateTime<Utc>) -> Result<Duration, EngineError> {
    let invalid = |reason: String| EngineError::InvalidWaitValue {
        state_name: state_name.to_string(),
        reason,
    };

    let delays = state.delays();
    let [delay] = delays.as_slice() else {
        return Err(invalid(format!(
            "exactly one of Seconds, SecondsPath, Timestamp, TimestampPath is required (found {})",
            delays.len()
        )));
    };

    match delay {
        WaitDelay::Seconds(seconds) => Ok(Duration::from_secs(*seconds)),
        WaitDelay::SecondsPath(expression) => {
            let value = path::resolve_payload(effective, expression)?;
            match value.as_f64() {
                Some(seconds) if seconds >= 0.0 => {
                    Duration::try_from_secs_f64(seconds).map_err(|error| invalid(format!("'{expression}' resolved to {value}: {error}")))
                }
                _ => Err(invalid(format!("'{expression}' must resolve to a non-negative number, found {value}"))),
            }
        }
        WaitDelay::Timestamp(timestamp) => until(timestamp, now).map_err(invalid),
        WaitDelay::TimestampPath(expression) => {
            let value = path::resolve_payload(effective, expression)?;
            let Some(timestamp) = value.as_str() else {
                return Err(invalid(format!(
                    "'{expression}' must resolve to a timestamp string, found {}",
                    path::json_type_name(&value)
                )));
            };
            until(timestamp, now).map_err(invalid)
        }
    }
}

fn until(timestamp: &str, now: DateTime<Utc>) -> Result<Duration, String> {
    let target = DateTime::parse_from_rfc3339(timestamp).map_err(|error| format!("'{timestamp}' is not an RFC 3339 timestamp: {error}"))?;
    Ok((target.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}
