//! Per-task progress aggregation.

use crate::bus::{boxed_callback, invoke_isolated, Callback, SubscriptionId};
use crate::error::HerdResult;
use crate::event::{Event, EventType, ProgressStage};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tracing::{debug, error};

/// Last reported state of one component working on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentProgress {
    /// Type of the component's latest event.
    pub status: EventType,
    /// Latest progress in `[0, 1]`.
    pub progress: f64,
}

/// Snapshot of a task's aggregated progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Furthest stage reached so far.
    pub stage: ProgressStage,
    /// When tracking began.
    pub started_at: DateTime<Utc>,
    /// Timestamp of the latest event.
    pub last_update: DateTime<Utc>,
    /// Per-component state, keyed by component name.
    pub components: BTreeMap<String, ComponentProgress>,
    /// Mean of every component's last reported progress.
    pub overall_progress: f64,
}

impl TaskProgress {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            stage: ProgressStage::Planning,
            started_at: now,
            last_update: now,
            components: BTreeMap::new(),
            overall_progress: 0.0,
        }
    }

    fn apply(&mut self, event: &Event) {
        let previous = self
            .components
            .get(&event.component)
            .map_or(0.0, |c| c.progress);
        let progress = event
            .progress
            .filter(|p| p.is_finite())
            .map_or(previous, |p| p.clamp(0.0, 1.0));
        self.components.insert(
            event.component.clone(),
            ComponentProgress {
                status: event.event_type,
                progress,
            },
        );

        let total: f64 = self.components.values().map(|c| c.progress).sum();
        self.overall_progress = total / self.components.len() as f64;
        self.stage = self.stage.advance(event.stage);
        self.last_update = event.timestamp;
    }
}

/// Tracks progress per task and notifies subscribers keyed by task id.
///
/// Unlike [`crate::EventBus`], delivery is inline: `emit` returns only after
/// every subscriber for the event's task has run.
#[derive(Default)]
pub struct EventManager {
    tasks: RwLock<HashMap<String, TaskProgress>>,
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, Callback<Event>)>>>,
}

impl EventManager {
    /// A manager tracking no tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `task_id`. Existing state is left untouched.
    pub fn init_task(&self, task_id: &str) {
        self.tasks
            .write()
            .entry(task_id.to_string())
            .or_insert_with(|| TaskProgress::new(Utc::now()));
    }

    /// Register `callback` for events of `task_id`.
    pub fn subscribe<F, Fut>(&self, task_id: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HerdResult<()>> + Send + 'static,
    {
        let id = SubscriptionId::next();
        self.subscribers
            .write()
            .entry(task_id.into())
            .or_default()
            .push((id, boxed_callback(callback)));
        id
    }

    /// Remove one subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, task_id: &str, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write();
        let Some(list) = subs.get_mut(task_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subs.remove(task_id);
        }
        removed
    }

    /// Fold `event` into its task's progress, then run the task's subscribers
    /// in registration order. Unknown tasks are initialised on first event.
    pub async fn emit(&self, event: Event) {
        {
            let mut tasks = self.tasks.write();
            let state = tasks
                .entry(event.task_id.clone())
                .or_insert_with(|| TaskProgress::new(event.timestamp));
            state.apply(&event);
            debug!(
                task_id = %event.task_id,
                component = %event.component,
                stage = %state.stage,
                overall = state.overall_progress,
                "Progress updated"
            );
        }

        let callbacks = self
            .subscribers
            .read()
            .get(&event.task_id)
            .cloned()
            .unwrap_or_default();
        for (_, callback) in &callbacks {
            if let Err(e) = invoke_isolated(callback, event.clone()).await {
                error!(task_id = %event.task_id, error = %e, "Progress subscriber failed");
            }
        }
    }

    /// Current progress of `task_id`.
    pub fn get_task_progress(&self, task_id: &str) -> Option<TaskProgress> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Forget `task_id`: its progress and every subscriber registered for
    /// it. Returns `false` if nothing was tracked.
    pub fn remove_task(&self, task_id: &str) -> bool {
        let had_progress = self.tasks.write().remove(task_id).is_some();
        let had_subscribers = self.subscribers.write().remove(task_id).is_some();
        if had_progress || had_subscribers {
            debug!(task_id = %task_id, "Task progress removed");
        }
        had_progress || had_subscribers
    }

    /// Number of tasks with tracked progress.
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Alias of [`EventManager::get_task_progress`].
    pub fn get_task_state(&self, task_id: &str) -> Option<TaskProgress> {
        self.get_task_progress(task_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn progress_event(task: &str, component: &str, progress: f64) -> Event {
        Event::new(
            EventType::ProgressUpdate,
            task,
            component,
            ProgressStage::DataGathering,
            "working",
        )
        .with_progress(progress)
    }

    #[test]
    fn test_init_task_is_idempotent() {
        let manager = EventManager::new();
        manager.init_task("t1");
        let first = manager.get_task_progress("t1").unwrap();
        manager.init_task("t1");
        let second = manager.get_task_progress("t1").unwrap();
        assert_eq!(first.started_at, second.started_at);
        assert_eq!(second.stage, ProgressStage::Planning);
        assert!(second.components.is_empty());
    }

    #[tokio::test]
    async fn test_overall_is_mean_of_components() {
        let manager = EventManager::new();
        manager.init_task("t1");
        manager.emit(progress_event("t1", "A", 0.4)).await;
        manager.emit(progress_event("t1", "B", 0.8)).await;
        let state = manager.get_task_progress("t1").unwrap();
        assert!((state.overall_progress - 0.6).abs() < 1e-9);

        manager.emit(progress_event("t1", "A", 1.0)).await;
        let state = manager.get_task_progress("t1").unwrap();
        assert!((state.overall_progress - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_progress_keeps_previous() {
        let manager = EventManager::new();
        manager.emit(progress_event("t1", "A", 0.5)).await;
        manager
            .emit(Event::new(
                EventType::Warning,
                "t1",
                "A",
                ProgressStage::Analysis,
                "slow upstream",
            ))
            .await;
        let state = manager.get_task_progress("t1").unwrap();
        assert_eq!(state.components["A"].progress, 0.5);
        assert_eq!(state.components["A"].status, EventType::Warning);
        assert_eq!(state.stage, ProgressStage::Analysis);
    }

    #[tokio::test]
    async fn test_progress_clamped() {
        let manager = EventManager::new();
        manager.emit(progress_event("t1", "A", 1.7)).await;
        assert_eq!(manager.get_task_progress("t1").unwrap().overall_progress, 1.0);
    }

    #[tokio::test]
    async fn test_subscribers_scoped_to_task_and_isolated() {
        let manager = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));

        manager.subscribe("t1", |_| async { Err(crate::HerdError::handler("bad subscriber")) });
        let h = Arc::clone(&hits);
        let id = manager.subscribe("t1", move |_| {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        manager.emit(progress_event("t1", "A", 0.1)).await;
        manager.emit(progress_event("t2", "A", 0.1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(manager.unsubscribe("t1", id));
        manager.emit(progress_event("t1", "A", 0.2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_task_drops_progress_and_subscribers() {
        let manager = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        manager.subscribe("t1", move |_| {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        manager.emit(progress_event("t1", "A", 0.5)).await;
        manager.emit(progress_event("t2", "A", 0.5)).await;
        assert_eq!(manager.task_count(), 2);

        assert!(manager.remove_task("t1"));
        assert!(!manager.remove_task("t1"));
        assert!(manager.get_task_progress("t1").is_none());
        assert!(manager.get_task_progress("t2").is_some());
        assert_eq!(manager.task_count(), 1);

        // A reused id starts fresh and no longer reaches the old subscriber.
        manager.emit(progress_event("t1", "A", 0.1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(manager.get_task_progress("t1").unwrap().overall_progress < 0.2);
    }

    #[test]
    fn test_unknown_task() {
        let manager = EventManager::new();
        assert!(manager.get_task_state("nope").is_none());
    }
}
