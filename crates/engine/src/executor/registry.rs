use std::{collections::HashMap, fmt, sync::Arc};

use sfsim_types::StateType;

use super::{ChoiceExecutor, FailExecutor, MapExecutor, PassExecutor, StateExecutor, SucceedExecutor, TaskExecutor, WaitExecutor};
use crate::error::EngineError;

/// Static association of state types to executors, built once at setup.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StateType, Arc<dyn StateExecutor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.executors.keys().map(StateType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ExecutorRegistry").field("state_types", &types).finish()
    }
}

impl ExecutorRegistry {
    /// A registry with no executors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Executors for Pass, Task, Wait, Choice, Fail, Succeed and Map.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(PassExecutor);
        registry.register(TaskExecutor);
        registry.register(WaitExecutor);
        registry.register(ChoiceExecutor);
        registry.register(FailExecutor);
        registry.register(SucceedExecutor);
        registry.register(MapExecutor);
        registry
    }

    /// Registers `executor` under its own state type, replacing any previous one.
    pub fn register(&mut self, executor: impl StateExecutor + 'static) {
        self.executors.insert(executor.state_type(), Arc::new(executor));
    }

    pub fn get_executor(&self, state_type: StateType) -> Result<Arc<dyn StateExecutor>, EngineError> {
        self.executors
            .get(&state_type)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedStateType {
                state_type: state_type.to_string(),
            })
    }
}
