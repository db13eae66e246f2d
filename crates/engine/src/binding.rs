//! Function binding lookup consumed by the Task executor.

use std::collections::HashMap;

use sfsim_types::FunctionBinding;

/// Resolves the function backing a Task state.
///
/// Lookups are deterministic; absence is a configuration error surfaced as
/// [`EngineError::HandlerNotFound`](crate::EngineError::HandlerNotFound), never retried.
pub trait FunctionBindingLookup: Send + Sync {
    fn lookup(&self, state_machine: &str, state_name: &str) -> Option<&FunctionBinding>;
}

/// In-memory bindings keyed by state machine name, then state name.
#[derive(Debug, Clone, Default)]
pub struct FunctionBindings {
    by_state_machine: HashMap<String, HashMap<String, FunctionBinding>>,
}

impl FunctionBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state_machine: impl Into<String>, state_name: impl Into<String>, binding: FunctionBinding) {
        self.by_state_machine
            .entry(state_machine.into())
            .or_default()
            .insert(state_name.into(), binding);
    }

    pub fn with_binding(mut self, state_machine: impl Into<String>, state_name: impl Into<String>, binding: FunctionBinding) -> Self {
        self.insert(state_machine, state_name, binding);
        self
    }

    pub fn len(&self) -> usize {
        self.by_state_machine.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FunctionBindingLookup for FunctionBindings {
    fn lookup(&self, state_machine: &str, state_name: &str) -> Option<&FunctionBinding> {
        self.by_state_machine.get(state_machine)?.get(state_name)
    }
}
