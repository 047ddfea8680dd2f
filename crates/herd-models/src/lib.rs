//! Model catalog and endpoint communication for the herd tool dispatcher.
//!
//! # Main types
//!
//! - [`ModelRegistry`]: File-backed catalog of model endpoint configurations.
//! - [`ModelConfig`]: One model's type, base model, endpoint and capabilities.
//! - [`ModelCommunicator`]: HTTP client that POSTs messages to model endpoints
//!   with exponential-backoff retries.

/// HTTP client for model endpoints.
pub mod communicator;
/// Model configuration catalog.
pub mod registry;

pub use communicator::{CommunicatorConfig, ModelCommunicator, ModelMessage, ModelStatus};
pub use registry::{default_models_with, ModelConfig, ModelRegistry};
