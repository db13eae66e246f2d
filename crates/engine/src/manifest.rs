//! Serverless-style manifest loading.
//!
//! The manifest is the setup boundary of the simulator. It declares functions and state machines in
//! the shape deployment tooling already uses:
//!
//! ```yaml
//! functions:
//!   hello:
//!     handler: src/handlers/hello.main
//! stepFunctions:
//!   stateMachines:
//!     greeter:
//!       definition:
//!         StartAt: Hello
//!         States:
//!           Hello: { Type: Task, Resource: arn:aws:lambda:us-east-1:0:function:svc-dev-hello, End: true }
//! custom:
//!   sfsim:
//!     defaultMapConcurrency: 4
//!     invoker: { program: node, args: [run-handler.js] }
//! ```
//!
//! Loading parses every definition, validates it and binds every Task state (including those inside
//! Map processors) to the handler of the function its resource names. Callback tasks bind through a
//! literal `Parameters.FunctionName`; a `FunctionName.$` path is only known at run time and is rejected.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sfsim_types::{FunctionBinding, StateDefinition, StateMachineDefinition, TaskState, validate_state_machine};
use tracing::debug;

use crate::{
    binding::FunctionBindings,
    error::EngineError,
    invoke::CommandSpec,
    processor::FUNCTION_NAME_FIELD,
    services::{DEFAULT_MAP_CONCURRENCY, EngineServices},
    simulator::Simulator,
};

/// Manifest file used when no path is given.
pub const DEFAULT_MANIFEST_FILE: &str = "serverless.yml";
/// Environment variable overriding the manifest path.
pub const MANIFEST_PATH_ENV: &str = "SFSIM_CONFIG";
/// Key under `custom` holding simulator options.
pub const OPTIONS_SECTION: &str = "sfsim";

const LAMBDA_FUNCTION_MARKER: &str = ":function:";
const DYNAMIC_FUNCTION_NAME_FIELD: &str = "FunctionName.$";

/// Simulator options. Unset fields fall back to the next configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_map_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<CommandSpec>,
}

impl SimulatorOptions {
    /// Layers `self` over `fallback`: fields set here win.
    pub fn merge(self, fallback: SimulatorOptions) -> SimulatorOptions {
        SimulatorOptions {
            default_map_concurrency: self.default_map_concurrency.or(fallback.default_map_concurrency),
            invoker: self.invoker.or(fallback.invoker),
        }
    }

    pub fn map_concurrency(&self) -> usize {
        self.default_map_concurrency.unwrap_or(DEFAULT_MAP_CONCURRENCY)
    }
}

/// A loaded manifest: validated state machines, their function bindings and declared options.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Directory handler module paths are relative to.
    pub base_dir: Option<PathBuf>,
    pub state_machines: IndexMap<String, StateMachineDefinition>,
    pub bindings: FunctionBindings,
    pub options: SimulatorOptions,
}

impl Manifest {
    /// Registers every state machine with a simulator built from `services`.
    pub fn into_simulator(self, services: EngineServices) -> Result<Simulator, EngineError> {
        let mut simulator = Simulator::new(services);
        for (name, definition) in self.state_machines {
            simulator.register_state_machine(name, definition)?;
        }
        Ok(simulator)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    #[serde(default)]
    functions: IndexMap<String, FunctionDeclaration>,
    #[serde(default)]
    step_functions: StepFunctionsSection,
    #[serde(default)]
    custom: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FunctionDeclaration {
    handler: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepFunctionsSection {
    #[serde(default)]
    state_machines: IndexMap<String, StateMachineDeclaration>,
}

#[derive(Debug, Deserialize)]
struct StateMachineDeclaration {
    definition: Value,
}

/// Resolves the manifest path: explicit path, then [`MANIFEST_PATH_ENV`], then [`DEFAULT_MANIFEST_FILE`].
pub fn manifest_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(MANIFEST_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_FILE))
}

/// Reads and parses a manifest file (YAML or JSON).
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read manifest {}", path.display()))?;
    let mut manifest = parse_manifest(&content).with_context(|| format!("failed to load manifest {}", path.display()))?;
    manifest.base_dir = path.parent().map(|parent| {
        if parent.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            parent.to_path_buf()
        }
    });
    Ok(manifest)
}

/// Parses manifest content. YAML is a superset of JSON, so both are accepted.
pub fn parse_manifest(content: &str) -> Result<Manifest> {
    let document: ManifestDocument = serde_yaml::from_str(content).context("failed to parse manifest")?;

    let options = match document.custom.get(OPTIONS_SECTION) {
        Some(section) => serde_json::from_value(section.clone()).with_context(|| format!("invalid custom.{OPTIONS_SECTION} options"))?,
        None => SimulatorOptions::default(),
    };

    let mut state_machines = IndexMap::new();
    let mut bindings = FunctionBindings::new();
    for (name, declaration) in document.step_functions.state_machines {
        let mut raw = declaration.definition;
        normalize_resources(&mut raw);
        let definition: StateMachineDefinition =
            serde_json::from_value(raw).with_context(|| format!("failed to parse definition of state machine '{name}'"))?;
        validate_state_machine(&definition).with_context(|| format!("state machine '{name}' is invalid"))?;
        bind_task_states(&name, &definition, &document.functions, &mut bindings)?;
        debug!(state_machine = %name, states = definition.states.len(), "loaded state machine");
        state_machines.insert(name, definition);
    }

    Ok(Manifest {
        base_dir: None,
        state_machines,
        bindings,
        options,
    })
}

/// Replaces `Resource: { Fn::GetAtt: [name, Arn] }` references with the function name.
fn normalize_resources(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(resource) = map.get_mut("Resource")
                && let Some(name) = get_att_target(resource)
            {
                *resource = Value::String(name);
            }
            map.values_mut().for_each(normalize_resources);
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_resources),
        _ => {}
    }
}

fn get_att_target(resource: &Value) -> Option<String> {
    let attribute = resource.as_object()?.get("Fn::GetAtt")?;
    match attribute {
        Value::Array(parts) => parts.first()?.as_str().map(str::to_string),
        Value::String(dotted) => dotted.split('.').next().map(str::to_string),
        _ => None,
    }
}

fn bind_task_states(
    state_machine: &str,
    definition: &StateMachineDefinition,
    functions: &IndexMap<String, FunctionDeclaration>,
    bindings: &mut FunctionBindings,
) -> Result<()> {
    for (state_name, state) in &definition.states {
        match state {
            StateDefinition::Task(task) => {
                let function = task_function_name(task).with_context(|| format!("state '{state_name}' of '{state_machine}'"))?;
                let declaration = functions.get(function).ok_or_else(|| {
                    anyhow!("state '{state_name}' of '{state_machine}' references function '{function}' which is not declared under functions")
                })?;
                let binding = FunctionBinding::from_handler(&declaration.handler)
                    .ok_or_else(|| anyhow!("handler '{}' of function '{function}' must look like 'path/to/module.entry'", declaration.handler))?;
                bindings.insert(state_machine, state_name.clone(), binding);
            }
            StateDefinition::Map(map) => {
                if let Some(processor) = map.processor() {
                    bind_task_states(state_machine, processor, functions, bindings)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Name of the function a Task state invokes.
fn task_function_name(task: &TaskState) -> Result<&str> {
    if !task.waits_for_task_token() {
        return Ok(function_name_from_resource(&task.resource));
    }
    let parameters = task.parameters.as_ref();
    let Some(target) = parameters.and_then(|parameters| parameters.get(FUNCTION_NAME_FIELD)) else {
        if parameters.is_some_and(|parameters| parameters.get(DYNAMIC_FUNCTION_NAME_FIELD).is_some()) {
            bail!("Parameters.{DYNAMIC_FUNCTION_NAME_FIELD} is resolved at run time and cannot be bound to a declared function; use a literal FunctionName");
        }
        bail!("callback task must declare Parameters.FunctionName");
    };
    match target.as_str() {
        Some(target) => Ok(function_name_from_resource(target)),
        None => bail!("Parameters.FunctionName must be a string"),
    }
}

/// Derives a function name from a task resource: the last `-` separated segment, after removing any
/// Lambda ARN prefix. `arn:aws:lambda:us-east-1:0:function:svc-dev-hello` yields `hello`.
pub fn function_name_from_resource(resource: &str) -> &str {
    let unqualified = match resource.find(LAMBDA_FUNCTION_MARKER) {
        Some(position) => &resource[position + LAMBDA_FUNCTION_MARKER.len()..],
        None => resource,
    };
    let unversioned = unqualified.split(':').next().unwrap_or(unqualified);
    unversioned.rsplit('-').next().unwrap_or(unversioned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::FunctionBindingLookup;

    const MANIFEST: &str = r#"
service: orders
functions:
  hello:
    handler: src/handlers/hello.main
  notify:
    handler: src/handlers/notify.handler
stepFunctions:
  stateMachines:
    greeter:
      definition:
        StartAt: Hello
        States:
          Hello:
            Type: Task
            Resource: arn:aws:lambda:us-east-1:000000000000:function:orders-dev-hello
            Next: Fan
          Fan:
            Type: Map
            ItemsPath: $.items
            ItemProcessor:
              StartAt: Notify
              States:
                Notify:
                  Type: Task
                  Resource:
                    Fn::GetAtt: [notify, Arn]
                  End: true
            End: true
custom:
  sfsim:
    defaultMapConcurrency: 2
    invoker:
      program: node
      args: [run.js]
"#;

    #[test]
    fn parses_definitions_bindings_and_options() {
        let manifest = parse_manifest(MANIFEST).expect("manifest");
        assert_eq!(manifest.state_machines.keys().collect::<Vec<_>>(), vec!["greeter"]);
        assert_eq!(
            manifest.bindings.lookup("greeter", "Hello"),
            Some(&FunctionBinding::new("src/handlers/hello", "main"))
        );
        assert_eq!(
            manifest.bindings.lookup("greeter", "Notify"),
            Some(&FunctionBinding::new("src/handlers/notify", "handler"))
        );
        assert_eq!(manifest.options.default_map_concurrency, Some(2));
        assert_eq!(manifest.options.invoker, Some(CommandSpec::new("node").with_args(["run.js"])));
    }

    #[test]
    fn undeclared_function_is_a_load_error() {
        let manifest = r#"
stepFunctions:
  stateMachines:
    broken:
      definition:
        StartAt: Missing
        States:
          Missing: { Type: Task, Resource: svc-dev-ghost, End: true }
"#;
        let error = parse_manifest(manifest).expect_err("undeclared function");
        assert!(format!("{error:#}").contains("'ghost'"), "{error:#}");
    }

    #[test]
    fn invalid_definition_is_rejected() {
        let manifest = r#"{ "stepFunctions": { "stateMachines": { "bad": { "definition": { "StartAt": "Nope", "States": { "A": { "Type": "Succeed" } } } } } } }"#;
        let error = parse_manifest(manifest).expect_err("invalid");
        assert!(format!("{error:#}").contains("StartAt 'Nope'"), "{error:#}");
    }

    #[test]
    fn callback_tasks_bind_through_function_name() {
        let manifest = r#"
functions:
  approve:
    handler: src/approve.main
stepFunctions:
  stateMachines:
    review:
      definition:
        StartAt: Approve
        States:
          Approve:
            Type: Task
            Resource: arn:aws:states:::lambda:invoke.waitForTaskToken
            Parameters:
              FunctionName: arn:aws:lambda:us-east-1:0:function:svc-dev-approve:$LATEST
              Payload: { "token.$": "$$.Task.Token" }
            End: true
"#;
        let manifest = parse_manifest(manifest).expect("manifest");
        assert_eq!(manifest.bindings.lookup("review", "Approve"), Some(&FunctionBinding::new("src/approve", "main")));
    }

    #[test]
    fn dynamic_callback_function_name_cannot_be_bound() {
        let manifest = r#"
functions:
  approve:
    handler: src/approve.main
stepFunctions:
  stateMachines:
    review:
      definition:
        StartAt: Approve
        States:
          Approve:
            Type: Task
            Resource: arn:aws:states:::lambda:invoke.waitForTaskToken
            Parameters:
              FunctionName.$: $.target
              Payload: { "token.$": "$$.Task.Token" }
            End: true
"#;
        let error = parse_manifest(manifest).expect_err("dynamic function name");
        assert!(format!("{error:#}").contains("FunctionName.$ is resolved at run time"), "{error:#}");
    }

    #[test]
    fn state_names_reused_inside_map_are_rejected() {
        let manifest = r#"
functions:
  outer:
    handler: src/outer.main
  inner:
    handler: src/inner.main
stepFunctions:
  stateMachines:
    batch:
      definition:
        StartAt: Work
        States:
          Work:
            Type: Task
            Resource: svc-dev-outer
            ResultPath: $.outer
            Next: Fan
          Fan:
            Type: Map
            ItemsPath: $.items
            ItemProcessor:
              StartAt: Work
              States:
                Work: { Type: Task, Resource: svc-dev-inner, End: true }
            End: true
"#;
        let error = parse_manifest(manifest).expect_err("duplicate state name");
        assert!(format!("{error:#}").contains("Fan > state 'Work' reuses a name"), "{error:#}");
    }

    #[test]
    fn function_names_come_from_resource_suffix() {
        assert_eq!(function_name_from_resource("arn:aws:lambda:us-east-1:0:function:svc-dev-hello"), "hello");
        assert_eq!(function_name_from_resource("svc-dev-hello"), "hello");
        assert_eq!(function_name_from_resource("hello"), "hello");
    }

    #[test]
    fn options_merge_prefers_the_first_layer() {
        let cli = SimulatorOptions {
            default_map_concurrency: Some(8),
            invoker: None,
        };
        let custom = SimulatorOptions {
            default_map_concurrency: Some(2),
            invoker: Some(CommandSpec::new("node")),
        };
        let merged = cli.merge(custom);
        assert_eq!(merged.map_concurrency(), 8);
        assert_eq!(merged.invoker, Some(CommandSpec::new("node")));
        assert_eq!(SimulatorOptions::default().map_concurrency(), DEFAULT_MAP_CONCURRENCY);
    }
}
