//! # sfsim Engine
//!
//! Local interpreter for Amazon States Language state machines. Given a definition and an input
//! document, the engine runs states one at a time, shapes the JSON payload through each state's path
//! fields and follows `Next`/`End` transitions until a terminal state is reached.
//!
//! ## Key Features
//!
//! - **Path Resolution**: `$`, `$.a.b` and `$$.Context.Field` references
//! - **Data Flow**: InputPath, Parameters, ResultPath and OutputPath stages
//! - **State Types**: Pass, Task (plain and `.waitForTaskToken`), Wait, Choice, Fail, Succeed, Map
//! - **Pluggable Invocation**: in-process handlers or an external command per Task
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use sfsim_engine::{EngineServices, FunctionBindings, HandlerRegistry, Simulator};
//! use sfsim_types::{FunctionBinding, StateMachineDefinition};
//!
//! let definition: StateMachineDefinition = serde_json::from_value(json!({
//!     "StartAt": "Hello",
//!     "States": {
//!         "Hello": { "Type": "Task", "Resource": "svc-dev-hello", "ResultPath": "$.greeting", "End": true }
//!     }
//! }))?;
//!
//! let binding = FunctionBinding::new("src/hello", "main");
//! let bindings = FunctionBindings::new().with_binding("greeter", "Hello", binding.clone());
//! let handlers = HandlerRegistry::new().with_handler(binding, |input, _context| async move {
//!     Ok(json!({ "message": format!("hello {}", input["name"].as_str().unwrap_or("world")) }))
//! });
//!
//! let mut simulator = Simulator::new(EngineServices::new(bindings, handlers));
//! simulator.register_state_machine("greeter", definition)?;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let output = runtime.block_on(simulator.execute("greeter", json!({ "name": "sfsim" })))?;
//! assert_eq!(output, json!({ "name": "sfsim", "greeting": { "message": "hello sfsim" } }));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`path`**: reference path parsing and resolution
//! - **`processor`**: the four data-flow stages
//! - **`executor`**: one executor per state type and the registry that dispatches to them
//! - **`driver`**: the per-execution state loop; Map items re-enter it
//! - **`simulator`**: registered state machines, spawned executions and their handles
//! - **`binding`** / **`invoke`**: which function backs a Task and how it is run
//! - **`manifest`**: serverless-style manifest loading

pub mod binding;
pub mod cancel;
pub mod condition;
pub mod context;
pub mod driver;
pub mod error;
pub mod executor;
pub mod invoke;
pub mod manifest;
pub mod path;
pub mod processor;
pub mod services;
pub mod simulator;
pub mod tokens;

pub use binding::{FunctionBindingLookup, FunctionBindings};
pub use cancel::{CancelHandle, CancelSignal};
pub use context::{ContextObject, ExecutionContext};
pub use driver::ExecutionDriver;
pub use error::EngineError;
pub use executor::{ExecutorRegistry, StateExecutor, StateInvocation, StateOutput};
pub use invoke::{CommandInvoker, CommandSpec, FunctionInvoker, HandlerRegistry};
pub use manifest::{Manifest, SimulatorOptions, load_manifest, manifest_path, parse_manifest};
pub use path::resolve;
pub use services::{DEFAULT_MAP_CONCURRENCY, EngineServices, Sleeper, TokioSleeper};
pub use simulator::{ExecutionHandle, Simulator};
pub use tokens::{TaskCompletion, TaskTokens};
