use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Value, json};
use sfsim_engine::{EngineError, EngineServices, FunctionBindings, HandlerRegistry, Simulator, Sleeper, TaskTokens};
use sfsim_types::{ExecutionEvent, FunctionBinding, StateMachineDefinition, StateType};
use tokio::sync::Notify;

const MACHINE: &str = "orders";

/// Records requested delays and returns immediately.
#[derive(Clone, Default)]
struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().expect("sleeper lock poisoned").push(duration);
    }
}

/// Never wakes up.
struct PendingSleeper;

#[async_trait::async_trait]
impl Sleeper for PendingSleeper {
    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await;
    }
}

fn definition(value: Value) -> StateMachineDefinition {
    serde_json::from_value(value).expect("parse definition")
}

fn binding(name: &str) -> FunctionBinding {
    FunctionBinding::new(format!("src/handlers/{name}"), "main")
}

fn simulator(definition_value: Value, bindings: FunctionBindings, handlers: HandlerRegistry) -> Simulator {
    simulator_with(definition_value, EngineServices::new(bindings, handlers))
}

fn simulator_with(definition_value: Value, services: EngineServices) -> Simulator {
    let mut simulator = Simulator::new(services);
    simulator
        .register_state_machine(MACHINE, definition(definition_value))
        .expect("register state machine");
    simulator
}

async fn run_collecting(simulator: &Simulator, input: Value) -> (Result<Value, EngineError>, Vec<ExecutionEvent>) {
    let mut handle = simulator.start_execution(MACHINE, input).expect("start execution");
    let mut events = handle.take_events().expect("events");
    let result = handle.wait().await;
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    (result, collected)
}

fn entered_states(events: &[ExecutionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StateEntered { state_name, map_item: None, .. } => Some(state_name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn pass_without_path_fields_returns_input_unchanged() {
    let simulator = simulator(
        json!({ "StartAt": "P", "States": { "P": { "Type": "Pass", "End": true } } }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );
    let input = json!({ "a": [1, 2, { "b": null }], "c": "text" });
    assert_eq!(simulator.execute(MACHINE, input.clone()).await.expect("execute"), input);
}

#[tokio::test]
async fn task_result_is_merged_at_result_path() {
    let simulator = simulator(
        json!({
            "StartAt": "Lookup",
            "States": { "Lookup": { "Type": "Task", "Resource": "svc-dev-lookup", "ResultPath": "$.result", "End": true } }
        }),
        FunctionBindings::new().with_binding(MACHINE, "Lookup", binding("lookup")),
        HandlerRegistry::new().with_handler(binding("lookup"), |_input, _context| async { Ok(json!({ "b": 2 })) }),
    );

    let output = simulator.execute(MACHINE, json!({ "a": 1 })).await.expect("execute");
    assert_eq!(output, json!({ "a": 1, "result": { "b": 2 } }));
}

#[tokio::test]
async fn task_parameters_shape_function_input_and_null_result_becomes_empty_object() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let simulator = simulator(
        json!({
            "StartAt": "Notify",
            "States": {
                "Notify": {
                    "Type": "Task",
                    "Resource": "svc-dev-notify",
                    "InputPath": "$.order",
                    "Parameters": { "id.$": "$.id", "channel": "email", "state.$": "$$.State.Name" },
                    "End": true
                }
            }
        }),
        FunctionBindings::new().with_binding(MACHINE, "Notify", binding("notify")),
        HandlerRegistry::new().with_handler(binding("notify"), move |input, _context| {
            let recorder = Arc::clone(&recorder);
            async move {
                recorder.lock().expect("recorder lock poisoned").push(input);
                Ok(Value::Null)
            }
        }),
    );

    let output = simulator.execute(MACHINE, json!({ "order": { "id": 9, "total": 3 } })).await.expect("execute");
    assert_eq!(output, json!({}));
    assert_eq!(
        seen.lock().expect("recorder lock poisoned").as_slice(),
        &[json!({ "id": 9, "channel": "email", "state": "Notify" })]
    );
}

#[tokio::test]
async fn unresolved_binding_fails_with_handler_not_found() {
    let simulator = simulator(
        json!({ "StartAt": "Lookup", "States": { "Lookup": { "Type": "Task", "Resource": "svc-dev-lookup", "End": true } } }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let (result, events) = run_collecting(&simulator, json!({ "a": 1 })).await;
    assert!(matches!(
        result,
        Err(EngineError::HandlerNotFound { ref state_machine, ref state_name }) if state_machine == MACHINE && state_name == "Lookup"
    ));
    assert!(events.iter().all(|event| !matches!(event, ExecutionEvent::ExecutionSucceeded { .. })));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::ExecutionFailed { error, .. }) if error == "States.TaskFailed"
    ));
}

#[tokio::test]
async fn function_errors_surface_as_task_execution_failed() {
    let simulator = simulator(
        json!({ "StartAt": "Charge", "States": { "Charge": { "Type": "Task", "Resource": "svc-dev-charge", "End": true } } }),
        FunctionBindings::new().with_binding(MACHINE, "Charge", binding("charge")),
        HandlerRegistry::new().with_handler(binding("charge"), |_input, _context| async { Err(anyhow::anyhow!("card declined")) }),
    );

    let error = simulator.execute(MACHINE, json!({})).await.expect_err("failure");
    assert!(matches!(error, EngineError::TaskExecutionFailed { ref message, .. } if message.contains("card declined")));
}

#[tokio::test]
async fn choice_selects_first_matching_rule_or_default() {
    let simulator = simulator(
        json!({
            "StartAt": "Size",
            "States": {
                "Size": {
                    "Type": "Choice",
                    "Choices": [{ "Variable": "$.x", "NumericGreaterThan": 10, "Next": "Big" }],
                    "Default": "Small"
                },
                "Big": { "Type": "Succeed" },
                "Small": { "Type": "Succeed" }
            }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let (result, events) = run_collecting(&simulator, json!({ "x": 5 })).await;
    assert_eq!(result.expect("small"), json!({ "x": 5 }));
    assert_eq!(entered_states(&events), vec!["Size", "Small"]);

    let (result, events) = run_collecting(&simulator, json!({ "x": 20 })).await;
    assert_eq!(result.expect("big"), json!({ "x": 20 }));
    assert_eq!(entered_states(&events), vec!["Size", "Big"]);
}

#[tokio::test]
async fn choice_without_match_or_default_fails() {
    let simulator = simulator(
        json!({
            "StartAt": "Size",
            "States": {
                "Size": { "Type": "Choice", "Choices": [{ "Variable": "$.x", "NumericGreaterThan": 10, "Next": "Big" }] },
                "Big": { "Type": "Succeed" }
            }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );
    let error = simulator.execute(MACHINE, json!({ "x": 1 })).await.expect_err("no match");
    assert!(matches!(error, EngineError::NoMatchingChoice { ref state_name } if state_name == "Size"));
}

#[tokio::test]
async fn fail_state_reports_declared_error_and_cause() {
    let simulator = simulator(
        json!({ "StartAt": "Stop", "States": { "Stop": { "Type": "Fail", "Error": "Order.Rejected", "Cause": "out of stock" } } }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let (result, events) = run_collecting(&simulator, json!({})).await;
    let error = result.expect_err("fail state");
    assert_eq!(error.error_name(), "Order.Rejected");
    assert_eq!(error.failure_cause().as_deref(), Some("out of stock"));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::ExecutionFailed { error, cause, .. })
            if error == "Order.Rejected" && cause.as_deref() == Some("out of stock")
    ));
}

#[tokio::test]
async fn map_aggregates_item_results_in_input_order() {
    let simulator = simulator(
        json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "ItemsPath": "$.list",
                    "ItemProcessor": { "StartAt": "Echo", "States": { "Echo": { "Type": "Pass", "End": true } } },
                    "End": true
                }
            }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let output = simulator.execute(MACHINE, json!({ "list": [1, 2, 3] })).await.expect("execute");
    assert_eq!(output, json!([1, 2, 3]));
}

#[tokio::test]
async fn map_order_does_not_depend_on_completion_order() {
    let simulator = simulator(
        json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "ItemsPath": "$.delays",
                    "MaxConcurrency": 3,
                    "ItemProcessor": { "StartAt": "Slow", "States": { "Slow": { "Type": "Task", "Resource": "svc-dev-slow", "End": true } } },
                    "ResultPath": "$.results",
                    "End": true
                }
            }
        }),
        FunctionBindings::new().with_binding(MACHINE, "Slow", binding("slow")),
        HandlerRegistry::new().with_handler(binding("slow"), |input, _context| async move {
            let millis = input.as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!({ "slept": millis }))
        }),
    );

    let output = simulator.execute(MACHINE, json!({ "delays": [60, 30, 0] })).await.expect("execute");
    assert_eq!(
        output,
        json!({ "delays": [60, 30, 0], "results": [{ "slept": 60 }, { "slept": 30 }, { "slept": 0 }] })
    );
}

#[tokio::test]
async fn map_item_selector_reads_item_context() {
    let simulator = simulator(
        json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "ItemsPath": "$.names",
                    "MaxConcurrency": 1,
                    "ItemSelector": { "index.$": "$$.Map.Item.Index", "name.$": "$$.Map.Item.Value", "batch.$": "$.batch" },
                    "Iterator": { "StartAt": "Echo", "States": { "Echo": { "Type": "Pass", "End": true } } },
                    "End": true
                }
            }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let output = simulator
        .execute(MACHINE, json!({ "batch": 7, "names": ["a", "b"] }))
        .await
        .expect("execute");
    assert_eq!(
        output,
        json!([{ "index": 0, "name": "a", "batch": 7 }, { "index": 1, "name": "b", "batch": 7 }])
    );
}

#[tokio::test]
async fn map_item_failure_carries_index() {
    let simulator = simulator(
        json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "ItemProcessor": {
                        "StartAt": "Check",
                        "States": {
                            "Check": {
                                "Type": "Choice",
                                "Choices": [{ "Variable": "$", "NumericLessThan": 0, "Next": "Reject" }],
                                "Default": "Accept"
                            },
                            "Reject": { "Type": "Fail", "Error": "Item.Negative" },
                            "Accept": { "Type": "Succeed" }
                        }
                    },
                    "End": true
                }
            }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let (result, events) = run_collecting(&simulator, json!([4, -1, 2])).await;
    let error = result.expect_err("item failure");
    assert!(matches!(error, EngineError::MapItemFailed { ref state_name, index: 1, .. } if state_name == "Fan"));
    assert_eq!(error.error_name(), "Item.Negative");
    assert!(events.iter().any(|event| matches!(
        event,
        ExecutionEvent::StateEntered { state_name, map_item: Some(1), .. } if state_name == "Reject"
    )));
}

#[tokio::test]
async fn map_rejects_non_array_items() {
    let simulator = simulator(
        json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "ItemsPath": "$.list",
                    "ItemProcessor": { "StartAt": "Echo", "States": { "Echo": { "Type": "Pass", "End": true } } },
                    "End": true
                }
            }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );
    let error = simulator.execute(MACHINE, json!({ "list": { "a": 1 } })).await.expect_err("not an array");
    assert!(matches!(error, EngineError::InvalidMapItems { found: "object", .. }));
}

#[tokio::test]
async fn wait_delays_through_the_sleeper() {
    let sleeper = RecordingSleeper::default();
    let services = EngineServices::default().with_sleeper(sleeper.clone());
    let simulator = simulator_with(
        json!({
            "StartAt": "Fixed",
            "States": {
                "Fixed": { "Type": "Wait", "Seconds": 5, "Next": "FromInput" },
                "FromInput": { "Type": "Wait", "SecondsPath": "$.delay", "OutputPath": "$.keep", "End": true }
            }
        }),
        services,
    );

    let output = simulator
        .execute(MACHINE, json!({ "delay": 2, "keep": { "x": 1 } }))
        .await
        .expect("execute");
    assert_eq!(output, json!({ "x": 1 }));
    assert_eq!(
        sleeper.delays.lock().expect("sleeper lock poisoned").as_slice(),
        &[Duration::from_secs(5), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn cancel_interrupts_a_waiting_execution() {
    let services = EngineServices::default().with_sleeper(PendingSleeper);
    let simulator = simulator_with(
        json!({
            "StartAt": "Hold",
            "States": { "Hold": { "Type": "Wait", "Seconds": 3600, "Next": "After" }, "After": { "Type": "Succeed" } }
        }),
        services,
    );

    let mut handle = simulator.start_execution(MACHINE, json!({})).expect("start");
    let mut events = handle.take_events().expect("events");
    loop {
        match events.recv().await.expect("event") {
            ExecutionEvent::StateEntered { state_type: StateType::Wait, .. } => break,
            _ => continue,
        }
    }
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.expect("cancelled in time");
    assert!(matches!(result, Err(EngineError::Cancelled)));
    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert!(matches!(last, Some(ExecutionEvent::ExecutionCancelled { .. })));
}

#[tokio::test]
async fn task_result_arriving_after_cancel_is_discarded() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let handlers = HandlerRegistry::new().with_handler(binding("charge"), {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        move |_input, _context| {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            async move {
                started.notify_one();
                release.notified().await;
                Ok(json!({ "charged": true }))
            }
        }
    });
    let simulator = simulator(
        json!({
            "StartAt": "Charge",
            "States": {
                "Charge": { "Type": "Task", "Resource": "svc-dev-charge", "Next": "Done" },
                "Done": { "Type": "Succeed" }
            }
        }),
        FunctionBindings::new().with_binding(MACHINE, "Charge", binding("charge")),
        handlers,
    );

    let mut handle = simulator.start_execution(MACHINE, json!({})).expect("start");
    let mut events = handle.take_events().expect("events");
    started.notified().await;
    handle.cancel();
    release.notify_one();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.expect("finished in time");
    assert!(matches!(result, Err(EngineError::Cancelled)), "{result:?}");

    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    assert!(!collected.iter().any(|event| matches!(
        event,
        ExecutionEvent::StateExited { .. } | ExecutionEvent::ExecutionSucceeded { .. }
    )));
    assert_eq!(entered_states(&collected), vec!["Charge"]);
    assert!(matches!(collected.last(), Some(ExecutionEvent::ExecutionCancelled { .. })));
}

#[tokio::test]
async fn oversized_wait_seconds_fail_the_state() {
    let services = EngineServices::default().with_sleeper(RecordingSleeper::default());
    let simulator = simulator_with(
        json!({ "StartAt": "Hold", "States": { "Hold": { "Type": "Wait", "SecondsPath": "$.d", "End": true } } }),
        services,
    );
    let error = simulator.execute(MACHINE, json!({ "d": 1e20 })).await.expect_err("delay out of range");
    assert!(matches!(error, EngineError::InvalidWaitValue { ref state_name, .. } if state_name == "Hold"), "{error:?}");
}

#[tokio::test]
async fn callback_task_waits_for_task_token() {
    let tokens = TaskTokens::new();
    let completer = tokens.clone();
    let services = EngineServices::new(
        FunctionBindings::new().with_binding(MACHINE, "Approve", binding("approve")),
        HandlerRegistry::new().with_handler(binding("approve"), move |payload, _context| {
            let completer = completer.clone();
            async move {
                let token = payload["token"].as_str().unwrap_or_default().to_string();
                let reviewer = payload["reviewer"].clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    completer
                        .send_task_success(&token, json!({ "approved": true, "by": reviewer }))
                        .expect("complete token");
                });
                Ok(json!({ "StatusCode": 202 }))
            }
        }),
    )
    .with_task_tokens(tokens.clone());

    let simulator = simulator_with(
        json!({
            "StartAt": "Approve",
            "States": {
                "Approve": {
                    "Type": "Task",
                    "Resource": "arn:aws:states:::lambda:invoke.waitForTaskToken",
                    "Parameters": {
                        "FunctionName": "svc-dev-approve",
                        "Payload": { "token.$": "$$.Task.Token", "reviewer.$": "$.reviewer" }
                    },
                    "ResultPath": "$.approval",
                    "End": true
                }
            }
        }),
        services,
    );

    let output = simulator.execute(MACHINE, json!({ "reviewer": "kim" })).await.expect("execute");
    assert_eq!(output, json!({ "reviewer": "kim", "approval": { "approved": true, "by": "kim" } }));
    assert!(tokens.pending().is_empty());
}

#[tokio::test]
async fn callback_task_failure_and_validation() {
    let tokens = TaskTokens::new();
    let completer = tokens.clone();
    let services = EngineServices::new(
        FunctionBindings::new().with_binding(MACHINE, "Approve", binding("approve")),
        HandlerRegistry::new().with_handler(binding("approve"), move |payload, _context| {
            let completer = completer.clone();
            async move {
                let token = payload["token"].as_str().unwrap_or_default().to_string();
                completer
                    .send_task_failure(&token, "Review.Rejected", Some("missing receipt".into()))
                    .expect("fail token");
                Ok(Value::Null)
            }
        }),
    )
    .with_task_tokens(tokens);

    let simulator = simulator_with(
        json!({
            "StartAt": "Approve",
            "States": {
                "Approve": {
                    "Type": "Task",
                    "Resource": "arn:aws:states:::lambda:invoke.waitForTaskToken",
                    "Parameters": { "FunctionName": "svc-dev-approve", "Payload": { "token.$": "$$.Task.Token" } },
                    "End": true
                }
            }
        }),
        services.clone(),
    );
    let error = simulator.execute(MACHINE, json!({})).await.expect_err("rejected");
    assert!(matches!(error, EngineError::TaskExecutionFailed { ref message, .. } if message == "Review.Rejected: missing receipt"));

    let simulator = simulator_with(
        json!({
            "StartAt": "Approve",
            "States": {
                "Approve": {
                    "Type": "Task",
                    "Resource": "arn:aws:states:::lambda:invoke.waitForTaskToken",
                    "Parameters": { "Payload": {} },
                    "End": true
                }
            }
        }),
        services,
    );
    let error = simulator.execute(MACHINE, json!({})).await.expect_err("missing function name");
    assert!(matches!(error, EngineError::MissingRequiredField { ref field } if field == "FunctionName"));
}

#[tokio::test]
async fn task_timeout_bounds_the_invocation() {
    let simulator = simulator(
        json!({
            "StartAt": "Hang",
            "States": { "Hang": { "Type": "Task", "Resource": "svc-dev-hang", "TimeoutSeconds": 1, "End": true } }
        }),
        FunctionBindings::new().with_binding(MACHINE, "Hang", binding("hang")),
        HandlerRegistry::new().with_handler(binding("hang"), |_input, _context| async {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }),
    );
    let error = simulator.execute(MACHINE, json!({})).await.expect_err("timeout");
    assert!(matches!(error, EngineError::TaskTimedOut { seconds: 1, .. }));
    assert_eq!(error.error_name(), "States.Timeout");
}

#[tokio::test]
async fn definition_timeout_bounds_the_execution() {
    let services = EngineServices::default().with_sleeper(PendingSleeper);
    let simulator = simulator_with(
        json!({
            "StartAt": "Hold",
            "TimeoutSeconds": 1,
            "States": { "Hold": { "Type": "Wait", "Seconds": 60, "End": true } }
        }),
        services,
    );
    let error = simulator.execute(MACHINE, json!({})).await.expect_err("timeout");
    assert!(matches!(error, EngineError::ExecutionTimedOut { seconds: 1 }));
}

#[tokio::test]
async fn parallel_states_are_not_supported() {
    let simulator = simulator(
        json!({ "StartAt": "Both", "States": { "Both": { "Type": "Parallel", "Branches": [], "End": true } } }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );
    let error = simulator.execute(MACHINE, json!({})).await.expect_err("unsupported");
    assert_eq!(error.to_string(), "State of Type \"Parallel\" is not supported yet.");
}

#[tokio::test]
async fn registration_validates_and_lookup_fails_for_unknown_machines() {
    let mut simulator = Simulator::new(EngineServices::default());
    let error = simulator
        .register_state_machine("broken", definition(json!({ "StartAt": "A", "States": { "A": { "Type": "Pass", "Next": "B" } } })))
        .expect_err("invalid");
    assert!(matches!(error, EngineError::InvalidDefinition(_)));
    assert!(simulator.state_machine_names().is_empty());

    let error = simulator.execute("missing", json!({})).await.expect_err("unknown");
    assert!(matches!(error, EngineError::UnknownStateMachine { ref name } if name == "missing"));
}

#[tokio::test]
async fn events_follow_the_execution_lifecycle() {
    let simulator = simulator(
        json!({
            "StartAt": "First",
            "States": { "First": { "Type": "Pass", "Next": "Done" }, "Done": { "Type": "Succeed" } }
        }),
        FunctionBindings::new(),
        HandlerRegistry::new(),
    );

    let (result, events) = run_collecting(&simulator, json!({ "n": 1 })).await;
    assert_eq!(result.expect("execute"), json!({ "n": 1 }));
    let kinds: Vec<&str> = events
        .iter()
        .map(|event| match event {
            ExecutionEvent::ExecutionStarted { .. } => "started",
            ExecutionEvent::StateEntered { .. } => "entered",
            ExecutionEvent::StateExited { .. } => "exited",
            ExecutionEvent::ExecutionSucceeded { .. } => "succeeded",
            ExecutionEvent::ExecutionFailed { .. } => "failed",
            ExecutionEvent::ExecutionCancelled { .. } => "cancelled",
        })
        .collect();
    assert_eq!(kinds, vec!["started", "entered", "exited", "entered", "exited", "succeeded"]);
    assert!(matches!(
        &events[0],
        ExecutionEvent::ExecutionStarted { state_machine, .. } if state_machine == MACHINE
    ));
}
