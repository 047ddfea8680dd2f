use crate::types::{Task, TaskStatus};
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use herd_core::{EventBus, HerdError, HerdResult, ObservationEvent, OBSERVATION_EVENT};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Concurrency limit used when none is configured.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Tracks task lifecycles and bounds how many task bodies run at once.
///
/// Every lifecycle change is published to the event bus under
/// [`OBSERVATION_EVENT`]. Failures are recorded and broadcast, then handed
/// back to the caller unchanged.
pub struct TaskManager {
    tasks: RwLock<HashMap<Uuid, Task>>,
    slots: Semaphore,
    max_concurrent: usize,
    bus: Arc<EventBus<ObservationEvent>>,
}

impl TaskManager {
    /// A `max_concurrent` of zero is raised to one.
    pub fn new(bus: Arc<EventBus<ObservationEvent>>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            tasks: RwLock::new(HashMap::new()),
            slots: Semaphore::new(max_concurrent),
            max_concurrent,
            bus,
        }
    }

    /// Record a new `created` task and broadcast it. Entries of `metadata`
    /// are copied onto the observation.
    pub async fn create_task(
        &self,
        content: impl Into<String>,
        task_type: impl Into<String>,
        metadata: HashMap<String, Value>,
    ) -> Uuid {
        let task = Task::new(content, task_type, metadata);
        let id = task.id;

        let mut event = ObservationEvent::new(format!(
            "New {} task created: {}",
            task.task_type, task.content
        ))
        .for_task(id.to_string())
        .with_metadata("status", json!(TaskStatus::Created))
        .with_metadata("type", json!(task.task_type));
        event
            .metadata
            .extend(task.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

        info!(task = %id, task_type = %task.task_type, "Task created");
        self.tasks.write().insert(id, task);
        self.bus.publish(OBSERVATION_EVENT, event).await;
        id
    }

    /// Run `executor` as the body of task `task_id`.
    ///
    /// Waits for a free slot, marks the task running, then awaits the
    /// executor. Its value is stored as the task result and returned; its
    /// error is stored, broadcast, and returned as is. A panic inside the
    /// executor fails the task like an error. Only `created` tasks can be
    /// executed.
    ///
    /// Dropping the returned future while the executor runs (a timeout or a
    /// losing `select!` branch) fails the task with the error `cancelled`
    /// and frees its slot.
    pub async fn execute_task<F, Fut, T, E>(&self, task_id: Uuid, executor: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display + From<HerdError>,
    {
        let task_type = self.runnable_task_type(task_id)?;
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| HerdError::Task("Task pool is closed".into()))?;

        self.update(task_id, |task| task.transition(TaskStatus::Running))?;
        let mut guard = CancelGuard {
            manager: self,
            task_id,
            task_type: &task_type,
            armed: true,
        };
        self.publish(
            task_id,
            format!("Starting execution of {task_type} task"),
            json!({"status": TaskStatus::Running, "type": task_type}),
        )
        .await;

        let started = Instant::now();
        let outcome = AssertUnwindSafe(executor())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(E::from(HerdError::from_panic(panic.as_ref()))));
        guard.armed = false;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(value) => {
                let result = serde_json::to_value(&value).unwrap_or_else(|e| {
                    warn!(task = %task_id, error = %e, "Task result is not serializable");
                    Value::Null
                });
                self.finish(task_id, |task| {
                    task.transition(TaskStatus::Completed)?;
                    task.result = Some(result);
                    Ok(())
                });
                info!(task = %task_id, elapsed_secs = elapsed, "Task completed");
                self.publish(
                    task_id,
                    format!("Task completed successfully in {elapsed:.2} seconds"),
                    json!({
                        "status": TaskStatus::Completed,
                        "type": task_type,
                        "execution_time": elapsed,
                    }),
                )
                .await;
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                self.finish(task_id, |task| {
                    task.transition(TaskStatus::Failed)?;
                    task.error = Some(message.clone());
                    Ok(())
                });
                error!(task = %task_id, elapsed_secs = elapsed, error = %message, "Task failed");
                self.publish(
                    task_id,
                    format!("Task failed after {elapsed:.2} seconds: {message}"),
                    json!({
                        "status": TaskStatus::Failed,
                        "type": task_type,
                        "error": message,
                        "execution_time": elapsed,
                    }),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Snapshot of one task.
    pub fn get_task_info(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.read().get(&task_id).cloned()
    }

    /// Tasks that are `created` or `running`, oldest first.
    pub fn get_active_tasks(&self) -> Vec<Task> {
        self.collect(|task| task.status.is_active())
    }

    /// Every tracked task, oldest first.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.collect(|_| true)
    }

    /// Drop terminal tasks that finished more than `max_age_hours` ago.
    /// Returns the ids removed.
    pub fn cleanup_completed_tasks(&self, max_age_hours: u64) -> Vec<Uuid> {
        let cutoff = i64::try_from(max_age_hours)
            .ok()
            .and_then(|hours| hours.checked_mul(3_600_000))
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.cleanup_finished_before(cutoff),
            // Older than representable time: nothing can be that old.
            None => Vec::new(),
        }
    }

    /// Drop terminal tasks whose finish time is strictly before `cutoff`.
    /// Returns the ids removed.
    pub fn cleanup_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        let mut tasks = self.tasks.write();
        let expired: Vec<Uuid> = tasks
            .values()
            .filter(|task| task.finished_at().is_some_and(|finished| finished < cutoff))
            .map(|task| task.id)
            .collect();
        for id in &expired {
            tasks.remove(id);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "Cleaned up finished tasks");
        }
        expired
    }

    /// Number of tracked tasks in any status.
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Upper bound on concurrently running task bodies.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots currently free for new task bodies.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    fn runnable_task_type(&self, task_id: Uuid) -> HerdResult<String> {
        let tasks = self.tasks.read();
        let task = tasks
            .get(&task_id)
            .ok_or_else(|| HerdError::TaskNotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Created {
            return Err(HerdError::Task(format!(
                "Task {task_id} is already {}",
                task.status
            )));
        }
        Ok(task.task_type.clone())
    }

    fn update<R>(&self, task_id: Uuid, f: impl FnOnce(&mut Task) -> HerdResult<R>) -> HerdResult<R> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or_else(|| HerdError::TaskNotFound(task_id.to_string()))?;
        f(task)
    }

    /// Like `update`, but the executor outcome wins over bookkeeping errors.
    fn finish(&self, task_id: Uuid, f: impl FnOnce(&mut Task) -> HerdResult<()>) {
        if let Err(e) = self.update(task_id, f) {
            error!(task = %task_id, error = %e, "Failed to record task outcome");
        }
    }

    fn collect(&self, keep: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().values().filter(|t| keep(t)).cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    async fn publish(&self, task_id: Uuid, content: String, metadata: Value) {
        let mut event = ObservationEvent::new(content).for_task(task_id.to_string());
        if let Value::Object(fields) = metadata {
            event.metadata.extend(fields);
        }
        self.bus.publish(OBSERVATION_EVENT, event).await;
    }
}

/// Fails a running task whose `execute_task` future is dropped before the
/// executor finishes.
struct CancelGuard<'a> {
    manager: &'a TaskManager,
    task_id: Uuid,
    task_type: &'a str,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let task_id = self.task_id;
        self.manager.finish(task_id, |task| {
            task.transition(TaskStatus::Failed)?;
            task.error = Some("cancelled".into());
            Ok(())
        });
        warn!(task = %task_id, "Task cancelled while running");
        let event = ObservationEvent::new("Task cancelled while running")
            .for_task(task_id.to_string())
            .with_metadata("status", json!(TaskStatus::Failed))
            .with_metadata("type", json!(self.task_type))
            .with_metadata("error", json!("cancelled"));
        // Drop cannot await; the event is delivered once the bus runs.
        self.manager.bus.enqueue(OBSERVATION_EVENT, event);
    }
}
