use herd_core::{EventBus, ObservationEvent, SubscriptionId, OBSERVATION_EVENT};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-task history of the observations published on an event bus.
///
/// Observations without a task id are not kept.
#[derive(Clone, Default)]
pub struct ObservationLog {
    history: Arc<RwLock<HashMap<String, Vec<ObservationEvent>>>>,
}

impl ObservationLog {
    /// An empty log, not yet attached to a bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the bus `observation` stream.
    pub fn attach(&self, bus: &EventBus<ObservationEvent>) -> SubscriptionId {
        let log = self.clone();
        bus.subscribe(OBSERVATION_EVENT, move |event: ObservationEvent| {
            log.record(event);
            std::future::ready(Ok(()))
        })
    }

    /// Undo [`ObservationLog::attach`].
    pub fn detach(&self, bus: &EventBus<ObservationEvent>, id: SubscriptionId) -> bool {
        bus.unsubscribe(OBSERVATION_EVENT, id)
    }

    /// Append `event` to its task's history.
    pub fn record(&self, event: ObservationEvent) {
        let Some(task_id) = event.task_id.clone() else {
            return;
        };
        debug!(task = %task_id, content = %event.content, "Observation");
        self.history.write().entry(task_id).or_default().push(event);
    }

    /// Observations for `task_id` in arrival order; empty if unknown.
    pub fn get_task_history(&self, task_id: &str) -> Vec<ObservationEvent> {
        self.history.read().get(task_id).cloned().unwrap_or_default()
    }

    /// Forget one task's history, or every task's with `None`.
    pub fn clear_task_history(&self, task_id: Option<&str>) {
        let mut history = self.history.write();
        match task_id {
            Some(id) => {
                history.remove(id);
            }
            None => history.clear(),
        }
    }

    /// Ids of tasks with recorded history, sorted.
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.history.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
