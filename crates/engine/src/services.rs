//! Collaborators shared by every execution of a simulator.
//!
//! [`EngineServices`] is built once at setup and passed by reference into every driver, Map items
//! included. All members are read-only or internally synchronised, so concurrent executions can share
//! one instance.

use std::{sync::Arc, time::Duration};

use crate::{
    binding::{FunctionBindingLookup, FunctionBindings},
    executor::ExecutorRegistry,
    invoke::{FunctionInvoker, HandlerRegistry},
    tokens::TaskTokens,
};

/// Map items in flight when neither the state nor the configuration sets a bound.
pub const DEFAULT_MAP_CONCURRENCY: usize = 40;

/// Monotonic delay primitive used by Wait states.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone)]
pub struct EngineServices {
    pub executors: Arc<ExecutorRegistry>,
    pub bindings: Arc<dyn FunctionBindingLookup>,
    pub invoker: Arc<dyn FunctionInvoker>,
    pub sleeper: Arc<dyn Sleeper>,
    pub task_tokens: TaskTokens,
    pub default_map_concurrency: usize,
}

impl std::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineServices")
            .field("executors", &self.executors)
            .field("task_tokens", &self.task_tokens.pending().len())
            .field("default_map_concurrency", &self.default_map_concurrency)
            .finish()
    }
}

impl EngineServices {
    /// Standard executors, the given bindings and invoker, the tokio sleeper.
    pub fn new(bindings: impl FunctionBindingLookup + 'static, invoker: impl FunctionInvoker + 'static) -> Self {
        Self {
            executors: Arc::new(ExecutorRegistry::standard()),
            bindings: Arc::new(bindings),
            invoker: Arc::new(invoker),
            sleeper: Arc::new(TokioSleeper),
            task_tokens: TaskTokens::new(),
            default_map_concurrency: DEFAULT_MAP_CONCURRENCY,
        }
    }

    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Arc::new(executors);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_task_tokens(mut self, task_tokens: TaskTokens) -> Self {
        self.task_tokens = task_tokens;
        self
    }

    /// Sets the Map bound used when a state declares `MaxConcurrency: 0`. Zero is treated as one.
    pub fn with_default_map_concurrency(mut self, limit: usize) -> Self {
        self.default_map_concurrency = limit.max(1);
        self
    }
}

impl Default for EngineServices {
    fn default() -> Self {
        Self::new(FunctionBindings::new(), HandlerRegistry::new())
    }
}
