//! Registry of asynchronous secondary-render tasks.

use std::sync::Arc;

use dashmap::DashMap;
use markmap_api_types::{TaskState, TaskView};
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

pub(crate) const METRIC_TASK_FINISHED: &str = "markmap_task_finished_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundTask {
    pub id: Uuid,
    pub state: TaskState,
    pub message: String,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
}

impl BackgroundTask {
    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.id,
            state: self.state,
            message: self.message.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// In-memory task registry shared between request handlers and workers.
///
/// Each task moves from pending to a terminal state exactly once; later
/// completion attempts are ignored.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<Uuid, BackgroundTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending task and return its id.
    pub fn create(&self, message: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.tasks.insert(
            id,
            BackgroundTask {
                id,
                state: TaskState::Pending,
                message: message.into(),
                created_at: OffsetDateTime::now_utc(),
                completed_at: None,
                error: None,
            },
        );
        id
    }

    /// Move a pending task to `completed` or `failed`.
    ///
    /// Returns false when the task is unknown or already terminal.
    pub fn complete(&self, id: Uuid, success: bool, message: impl Into<String>) -> bool {
        let Some(mut task) = self.tasks.get_mut(&id) else {
            return false;
        };
        if task.state.is_terminal() {
            debug!(
                target = "application::tasks",
                task_id = %id,
                state = task.state.as_str(),
                "ignoring repeated completion"
            );
            return false;
        }

        let message = message.into();
        task.state = if success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        task.completed_at = Some(OffsetDateTime::now_utc());
        if !success {
            task.error = Some(message.clone());
        }
        task.message = message;
        counter!(METRIC_TASK_FINISHED, "state" => task.state.as_str()).increment(1);
        true
    }

    pub fn get(&self, id: Uuid) -> Option<BackgroundTask> {
        self.tasks.get(&id).map(|task| task.clone())
    }

    /// Drop terminal tasks that finished before `cutoff`. Pending tasks stay.
    pub fn prune_finished_before(&self, cutoff: OffsetDateTime) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| task.completed_at.is_none_or(|done| done >= cutoff));
        before.saturating_sub(self.tasks.len())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
