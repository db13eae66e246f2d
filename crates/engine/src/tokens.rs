//! Task tokens for callback-style Task states.
//!
//! A `.waitForTaskToken` task registers a token, hands it to its function through the context
//! object and then waits until some external party reports the outcome with
//! [`TaskTokens::send_task_success`] or [`TaskTokens::send_task_failure`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;

/// Outcome reported for a task token.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskCompletion {
    Success(Value),
    Failure { error: String, cause: Option<String> },
}

/// Shared registry of outstanding task tokens. Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct TaskTokens {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<TaskCompletion>>>>,
}

impl TaskTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token and returns it with the receiver its completion arrives on.
    pub fn issue(&self) -> (String, oneshot::Receiver<TaskCompletion>) {
        let token = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .expect("task token lock poisoned")
            .insert(token.clone(), sender);
        (token, receiver)
    }

    pub fn send_task_success(&self, token: &str, output: Value) -> Result<(), EngineError> {
        self.complete(token, TaskCompletion::Success(output))
    }

    pub fn send_task_failure(&self, token: &str, error: impl Into<String>, cause: Option<String>) -> Result<(), EngineError> {
        self.complete(
            token,
            TaskCompletion::Failure {
                error: error.into(),
                cause,
            },
        )
    }

    /// Drops a token whose task no longer waits for it.
    pub fn revoke(&self, token: &str) {
        self.pending.lock().expect("task token lock poisoned").remove(token);
    }

    /// Tokens still waiting for completion.
    pub fn pending(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.pending.lock().expect("task token lock poisoned").keys().cloned().collect();
        tokens.sort();
        tokens
    }

    fn complete(&self, token: &str, completion: TaskCompletion) -> Result<(), EngineError> {
        let sender = self
            .pending
            .lock()
            .expect("task token lock poisoned")
            .remove(token)
            .ok_or_else(|| EngineError::UnknownTaskToken { token: token.to_string() })?;
        debug!(token, "completing task token");
        sender
            .send(completion)
            .map_err(|_| EngineError::UnknownTaskToken { token: token.to_string() })
    }
}
