//! Core types and event plumbing for the herd tool dispatcher.
//!
//! This crate provides the foundational types shared across all herd crates,
//! including error handling, tool request/response shapes, progress events and
//! the asynchronous event bus.
//!
//! # Main types
//!
//! - [`HerdError`]: Unified error enum for all herd subsystems.
//! - [`HerdResult`]: Convenience alias for `Result<T, HerdError>`.
//! - [`ToolRequest`] / [`ToolResponse`]: Input and outcome of a tool execution.
//! - [`Event`] / [`ObservationEvent`]: Structured progress and free-form observations.
//! - [`EventBus`]: Type-keyed publish/subscribe queue with an ordered consumer.
//! - [`EventManager`]: Per-task progress aggregation.
//! - [`RetryPolicy`]: Exponential backoff shared by the router and communicator.

/// Publish/subscribe event bus.
pub mod bus;
/// Error taxonomy.
pub mod error;
/// Progress and observation event types.
pub mod event;
/// Task progress aggregation.
pub mod progress;
/// Exponential backoff configuration.
pub mod retry;
/// Tracing subscriber setup.
pub mod telemetry;
/// Tool request, response and metrics types.
pub mod tool;

pub use bus::{Callback, EventBus, SubscriptionId};
pub use error::{HerdError, HerdResult, ToolErrorKind};
pub use event::{Event, EventType, ObservationEvent, ProgressStage};
pub use progress::{ComponentProgress, EventManager, TaskProgress};
pub use retry::RetryPolicy;
pub use telemetry::{init_tracing, LoggingConfig};
pub use tool::{Parameters, ResponseMetrics, ToolMetrics, ToolRequest, ToolResponse, ToolStatus};

/// Event type under which task lifecycle observations are published.
pub const OBSERVATION_EVENT: &str = "observation";
