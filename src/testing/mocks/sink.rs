use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::disposal::{Disposable, DisposalSink};

/// Sink that keeps submitted tasks instead of running them
#[derive(Default)]
pub struct RecordingSink {
    tasks: Mutex<Vec<Box<dyn Disposable>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn display_names(&self) -> Vec<String> {
        self.tasks().iter().map(|task| task.display_name()).collect()
    }

    /// Durable payloads of the submitted tasks, in submission order
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.tasks()
            .iter()
            .filter_map(|task| task.to_payload().ok())
            .collect()
    }

    /// Hand the submitted tasks over, leaving the sink empty
    pub fn take(&self) -> Vec<Box<dyn Disposable>> {
        std::mem::take(&mut *self.tasks())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<Box<dyn Disposable>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DisposalSink for RecordingSink {
    async fn submit(&self, task: Box<dyn Disposable>) {
        self.tasks().push(task);
    }
}
