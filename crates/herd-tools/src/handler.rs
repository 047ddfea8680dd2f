use crate::smart_router::ToolCapability;
use async_trait::async_trait;
use herd_core::{HerdResult, Parameters};
use serde::{Deserialize, Serialize};

fn default_category() -> String {
    "general".to_string()
}

/// Descriptive metadata used for grouping discovered tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Group the tool is listed under.
    #[serde(default = "default_category")]
    pub category: String,
    /// Free-form capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            category: default_category(),
            capabilities: Vec::new(),
        }
    }
}

impl ToolMetadata {
    /// Metadata in `category` with no capabilities.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            capabilities: Vec::new(),
        }
    }

    /// Set the capability tags.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Trait every tool implements.
///
/// Only `execute` is required. Discovery uses `tool_id` when present and a
/// module-qualified name otherwise; a handler that returns a `capability`
/// becomes reachable through free-text queries.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Explicit identifier for this tool.
    fn tool_id(&self) -> Option<&str> {
        None
    }

    /// Grouping metadata; category `general` unless overridden.
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }

    /// Keywords and example phrasings for natural-language routing.
    fn capability(&self) -> Option<ToolCapability> {
        None
    }

    /// Run the tool. Any error counts as a failed attempt.
    async fn execute(&self, parameters: &Parameters) -> HerdResult<serde_json::Value>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
///
/// ```ignore
/// let echo = FnHandler::new(|params| async move { Ok(serde_json::Value::Object(params)) });
/// ```
pub struct FnHandler<F> {
    func: F,
    metadata: ToolMetadata,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Parameters) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HerdResult<serde_json::Value>> + Send,
{
    /// Wrap `func` with default metadata.
    pub fn new(func: F) -> Self {
        Self {
            func,
            metadata: ToolMetadata::default(),
        }
    }

    /// Report `metadata` instead of the default.
    pub fn with_metadata(mut self, metadata: ToolMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Parameters) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HerdResult<serde_json::Value>> + Send,
{
    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    async fn execute(&self, parameters: &Parameters) -> HerdResult<serde_json::Value> {
        (self.func)(parameters.clone()).await
    }
}
