//! Task lifecycle management and runtime wiring for the herd tool dispatcher.
//!
//! Wraps units of work in tracked tasks with bounded concurrency, broadcasts
//! lifecycle observations on the event bus, and assembles every component
//! into one explicitly owned runtime.
//!
//! # Main types
//!
//! - [`Herd`]: The assembled engine owning every component.
//! - [`TaskManager`]: Creates tasks and runs their bodies under a concurrency limit.
//! - [`ObservationLog`]: Per-task history of bus observations.
//! - [`HerdConfig`]: TOML configuration for the whole runtime.

/// Runtime configuration.
pub mod config;
/// Observation history subscriber.
pub mod observer;
/// Component wiring and lifecycle.
pub mod runtime;
/// Task creation and admission-controlled execution.
pub mod task_manager;
/// Task records and status transitions.
pub mod types;

pub use config::{DiscoveryConfig, HerdConfig, RegistryConfig, RouterConfig, TasksConfig};
pub use observer::ObservationLog;
pub use runtime::Herd;
pub use task_manager::{TaskManager, DEFAULT_MAX_CONCURRENT};
pub use types::{Task, TaskStatus, TaskTransition};
