use chrono::{DateTime, Utc};
use herd_core::{HerdError, HerdResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Recorded, not yet started.
    Created,
    /// The body is executing.
    Running,
    /// The body returned a value.
    Completed,
    /// The body failed, panicked or was cancelled.
    Failed,
}

impl TaskStatus {
    /// `created -> running -> completed | failed`; nothing leaves a terminal state.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Created, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    /// `completed` and `failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `created` and `running` tasks are active.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    /// Status before the change.
    pub from: TaskStatus,
    /// Status after the change.
    pub to: TaskStatus,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// A unit of work tracked by the task manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// What the task is about, e.g. the query text.
    pub content: String,
    /// Caller-chosen kind, e.g. `query`.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Caller-supplied context.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the task was recorded.
    pub created_at: DateTime<Utc>,
    /// When the body started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the body succeeded.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the body failed.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Serialized value of a completed body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message of a failed body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every status change, oldest first.
    #[serde(default)]
    pub history: Vec<TaskTransition>,
}

impl Task {
    /// A `created` task with a fresh id.
    pub fn new(
        content: impl Into<String>,
        task_type: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Created,
            content: content.into(),
            task_type: task_type.into(),
            metadata,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            error: None,
            history: Vec::new(),
        }
    }

    /// Move to `next`, stamping the matching timestamp and appending to
    /// `history`. Illegal transitions leave the task untouched.
    pub fn transition(&mut self, next: TaskStatus) -> HerdResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(HerdError::Task(format!(
                "Task {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed => self.completed_at = Some(now),
            TaskStatus::Failed => self.failed_at = Some(now),
            TaskStatus::Created => {}
        }
        self.history.push(TaskTransition {
            from: self.status,
            to: next,
            at: now,
        });
        self.status = next;
        Ok(())
    }

    /// When the task reached its terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            TaskStatus::Completed => self.completed_at,
            TaskStatus::Failed => self.failed_at,
            _ => None,
        }
    }
}
