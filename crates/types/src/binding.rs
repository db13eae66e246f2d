//! Function bindings: where the implementation behind a Task state lives.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a function implementation, split from a `path/to/module.entry` handler string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionBinding {
    /// Module location, e.g. `src/handlers/hello`.
    pub module_path: String,
    /// Exported entry point within the module, e.g. `main`.
    pub entry_name: String,
}

impl FunctionBinding {
    pub fn new(module_path: impl Into<String>, entry_name: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            entry_name: entry_name.into(),
        }
    }

    /// Splits a handler declaration at its last `.`.
    ///
    /// Returns `None` when the handler has no separator or either side is empty.
    pub fn from_handler(handler: &str) -> Option<Self> {
        let (module_path, entry_name) = handler.rsplit_once('.')?;
        if module_path.is_empty() || entry_name.is_empty() {
            return None;
        }
        Some(Self::new(module_path, entry_name))
    }
}

impl fmt::Display for FunctionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module_path, self.entry_name)
    }
}
