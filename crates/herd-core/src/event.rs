use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kinds of structured progress events a component can emit for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A task began.
    TaskStarted,
    /// A task finished successfully.
    TaskCompleted,
    /// A task failed.
    TaskFailed,
    /// A belter was assigned to the task.
    BelterAssigned,
    /// A belter started working.
    BelterStarted,
    /// A belter finished.
    BelterCompleted,
    /// A belter failed.
    BelterFailed,
    /// A drummer (tool) was assigned to the task.
    DrummerAssigned,
    /// A drummer started working.
    DrummerStarted,
    /// A drummer finished.
    DrummerCompleted,
    /// A drummer failed.
    DrummerFailed,
    /// Input collection is under way.
    DataGathering,
    /// Collected input is being processed.
    DataProcessing,
    /// Analysis began.
    AnalysisStarted,
    /// Analysis finished.
    AnalysisCompleted,
    /// Synthesis began.
    SynthesisStarted,
    /// Synthesis finished.
    SynthesisCompleted,
    /// Plain progress report.
    ProgressUpdate,
    /// Non-fatal problem.
    Warning,
    /// Fatal problem.
    Error,
}

/// Coarse execution stage of a task.
///
/// Stages are ordered: `Planning < DataGathering < Analysis < Synthesis <
/// Review < Complete`. `Failed` can be entered from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Work is being planned.
    Planning,
    /// Inputs are being collected.
    DataGathering,
    /// Inputs are being analysed.
    Analysis,
    /// Results are being combined.
    Synthesis,
    /// Results are being checked.
    Review,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
}

impl ProgressStage {
    fn rank(self) -> u8 {
        match self {
            ProgressStage::Planning => 0,
            ProgressStage::DataGathering => 1,
            ProgressStage::Analysis => 2,
            ProgressStage::Synthesis => 3,
            ProgressStage::Review => 4,
            ProgressStage::Complete | ProgressStage::Failed => 5,
        }
    }

    /// `Complete` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStage::Complete | ProgressStage::Failed)
    }

    /// The stage a task is in after observing `next` while in `self`.
    ///
    /// Terminal stages are sticky, `Failed` overrides any non-terminal stage,
    /// and otherwise the stage never moves backwards.
    pub fn advance(self, next: ProgressStage) -> ProgressStage {
        if self.is_terminal() {
            return self;
        }
        if next == ProgressStage::Failed || next.rank() >= self.rank() {
            next
        } else {
            self
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProgressStage::Planning => "planning",
            ProgressStage::DataGathering => "data_gathering",
            ProgressStage::Analysis => "analysis",
            ProgressStage::Synthesis => "synthesis",
            ProgressStage::Review => "review",
            ProgressStage::Complete => "complete",
            ProgressStage::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A structured progress report from one component working on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event_type: EventType,
    /// Task the event belongs to.
    pub task_id: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Reporting component, e.g. `"camina"` or `"location_drummer"`.
    pub component: String,
    /// Stage the component reports the task in.
    pub stage: ProgressStage,
    /// Human-readable summary.
    pub message: String,
    /// Free-form structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Fraction of the component's work done, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Free-form estimate, e.g. `"2 minutes"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<String>,
}

impl Event {
    /// An event stamped with the current time, with no progress or details.
    pub fn new(
        event_type: EventType,
        task_id: impl Into<String>,
        component: impl Into<String>,
        stage: ProgressStage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            component: component.into(),
            stage,
            message: message.into(),
            details: None,
            progress: None,
            estimated_time_remaining: None,
        }
    }

    /// Set the fraction of work done.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach structured detail.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a time estimate.
    pub fn with_estimated_time_remaining(mut self, eta: impl Into<String>) -> Self {
        self.estimated_time_remaining = Some(eta.into());
        self
    }
}

/// Free-form commentary about a task, broadcast on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEvent {
    /// When the observation was made.
    pub timestamp: DateTime<Utc>,
    /// Observation text.
    pub content: String,
    /// Task the observation is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Arbitrary structured context, e.g. `status` and `type`.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ObservationEvent {
    /// An observation stamped with the current time.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            content: content.into(),
            task_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Tie the observation to a task.
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
