//! Tool handlers, routing and discovery for the herd tool dispatcher.
//!
//! # Main types
//!
//! - [`ToolHandler`]: Trait every tool implements.
//! - [`ToolRouter`]: Executes tool requests with dependency checks, retries and metrics.
//! - [`SmartRouter`]: Resolves free-text queries to tool requests.
//! - [`ToolCatalog`]: Compile-time list of tool module entry points.
//! - [`ToolDiscovery`]: Loads tool modules selected by manifests and registers them.
//! - [`ModelTool`]: Handler that forwards requests to a registry model.

/// Built-in belter and drummer capabilities.
pub mod capabilities;
/// Compile-time registry of tool modules.
pub mod catalog;
/// Manifest-driven tool loading.
pub mod discovery;
/// The tool handler trait and adapters.
pub mod handler;
/// Tools backed by registry models.
pub mod model_tool;
/// Request execution with retries and metrics.
pub mod router;
/// Free-text query routing.
pub mod smart_router;

pub use capabilities::{get_capability, standard_capabilities};
pub use catalog::{ModuleEntryPoint, ToolCatalog, ToolEntry, ToolFactory};
pub use discovery::{DiscoveredTool, ToolDiscovery, ToolManifest};
pub use handler::{FnHandler, ToolHandler, ToolMetadata};
pub use model_tool::ModelTool;
pub use router::ToolRouter;
pub use smart_router::{derive_pattern, SmartRouter, ToolCapability, ToolPattern};
