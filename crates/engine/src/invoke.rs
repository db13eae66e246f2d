//! Invocation capability used by Task states.
//!
//! The engine never knows how a function is built or where its artifacts live. It hands a
//! [`FunctionBinding`] plus input and context to a [`FunctionInvoker`]:
//!
//! - [`HandlerRegistry`] runs async Rust closures registered in process (tests, embedding).
//! - [`CommandInvoker`] runs an external program per invocation and exchanges JSON over stdio.

use std::{collections::HashMap, fmt, future::Future, io, path::PathBuf, process::Stdio, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sfsim_types::FunctionBinding;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Environment variable carrying the binding's module path to a command handler.
pub const HANDLER_MODULE_ENV: &str = "SFSIM_HANDLER_MODULE";
/// Environment variable carrying the binding's entry name to a command handler.
pub const HANDLER_NAME_ENV: &str = "SFSIM_HANDLER_NAME";

/// Runs the function behind a binding.
#[async_trait::async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Invokes the function with the state's effective input and its context object.
    async fn invoke(&self, binding: &FunctionBinding, input: Value, context: Value) -> Result<Value>;
}

type Handler = Arc<dyn Fn(Value, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// In-process handlers keyed by `(module_path, entry_name)`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<FunctionBinding, Handler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bindings: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        bindings.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &bindings).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the binding `module_path.entry_name`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, binding: FunctionBinding, handler: F)
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |input, context| Box::pin(handler(input, context)));
        self.handlers.insert(binding, handler);
    }

    pub fn with_handler<F, Fut>(mut self, binding: FunctionBinding, handler: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(binding, handler);
        self
    }
}

#[async_trait::async_trait]
impl FunctionInvoker for HandlerRegistry {
    async fn invoke(&self, binding: &FunctionBinding, input: Value, context: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(binding)
            .cloned()
            .ok_or_else(|| anyhow!("no in-process handler registered for '{binding}'"))?;
        handler(input, context).await
    }
}

/// External program used to run handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Invokes handlers by spawning [`CommandSpec`] once per call.
///
/// The binding is passed through [`HANDLER_MODULE_ENV`] and [`HANDLER_NAME_ENV`]; the request
/// `{"input": ..., "context": ...}` is written to stdin and the last JSON document printed on stdout
/// is the result. A non-zero exit status fails the invocation with the captured stderr.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    spec: CommandSpec,
}

impl CommandInvoker {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn build_command(&self, binding: &FunctionBinding) -> Command {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .env(HANDLER_MODULE_ENV, &binding.module_path)
            .env(HANDLER_NAME_ENV, &binding.entry_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(working_dir) = &self.spec.working_dir {
            command.current_dir(working_dir);
        }
        command
    }
}

#[async_trait::async_trait]
impl FunctionInvoker for CommandInvoker {
    async fn invoke(&self, binding: &FunctionBinding, input: Value, context: Value) -> Result<Value> {
        debug!(program = %self.spec.program, handler = %binding, "spawning handler process");
        let mut child = self
            .build_command(binding)
            .spawn()
            .with_context(|| format!("failed to spawn handler program '{}'", self.spec.program))?;

        let request = serde_json::to_vec(&json!({ "input": input, "context": context })).context("failed to encode handler request")?;
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&request).await {
                Ok(()) => {}
                // the handler may exit without reading its input
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {}
                Err(error) => return Err(error).context("failed to write handler request"),
            }
        }

        let output = child.wait_with_output().await.context("failed to wait for handler process")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("handler '{binding}' exited with {}: {}", output.status, stderr.trim());
        }

        parse_handler_output(&String::from_utf8_lossy(&output.stdout)).with_context(|| format!("handler '{binding}' produced invalid output"))
    }
}

/// Extracts the result document from handler stdout.
///
/// The whole output is tried first; otherwise the last line holding a JSON document wins, so
/// handlers may log freely before printing their result. Empty output is `null`.
pub fn parse_handler_output(stdout: &str) -> Result<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    trimmed
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line.trim()).ok())
        .ok_or_else(|| anyhow!("no JSON document found in output"))
}
