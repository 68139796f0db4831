use std::collections::HashMap;

use super::{Disposable, QueueError};

/// Rebuilds a task of one kind from its persisted payload
pub type Reviver = fn(serde_json::Value) -> Result<Box<dyn Disposable>, serde_json::Error>;

/// Registry of the task kinds a queue can revive from storage
#[derive(Clone, Default)]
pub struct DisposableKinds {
    revivers: HashMap<String, Reviver>,
}

impl DisposableKinds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind, replacing any previous reviver for it
    pub fn register(&mut self, kind: &str, reviver: Reviver) -> &mut Self {
        self.revivers.insert(kind.to_string(), reviver);
        self
    }

    pub fn with(mut self, kind: &str, reviver: Reviver) -> Self {
        self.register(kind, reviver);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.revivers.contains_key(kind)
    }

    pub fn revive(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Box<dyn Disposable>, QueueError> {
        let reviver = self
            .revivers
            .get(kind)
            .ok_or_else(|| QueueError::UnknownKind(kind.to_string()))?;
        Ok(reviver(payload)?)
    }
}
