//! In-memory task table.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;
use uuid::Uuid;

use super::models::{Outcome, Task};
use crate::protocol::{TaskStatus, TaskStatusResponse};

/// Concurrent map of task id to task record.
///
/// Every read and write goes through the owning shard lock, so a poller
/// never sees a status without its result or error.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `processing` task and return its id.
    pub fn create(&self, model_id: &str, task_type: &str) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.tasks.entry(id.clone()) {
                slot.insert(Task::new(id.clone(), model_id.to_string(), task_type.to_string()));
                return id;
            }
        }
    }

    /// Snapshot of a task.
    pub fn get(&self, id: &str) -> Option<TaskStatusResponse> {
        self.tasks.get(id).map(|task| task.to_response())
    }

    /// Record the terminal outcome. Returns false if the task is unknown or
    /// already terminal; the record is left untouched in that case.
    pub fn finish(&self, id: &str, outcome: Outcome) -> bool {
        match self.tasks.get_mut(id) {
            Some(mut task) => {
                let finished = task.finish(outcome);
                if !finished {
                    warn!(task_id = %id, status = %task.status, "ignoring second terminal write");
                }
                finished
            }
            None => {
                warn!(task_id = %id, "finish called for unknown task");
                false
            }
        }
    }

    /// Number of tasks still processing.
    pub fn processing(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Processing)
            .count()
    }

    /// Every task ever issued, terminal or not.
    pub fn count(&self) -> usize {
        self.tasks.len()
    }
}
