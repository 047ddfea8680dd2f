use crate::handler::{ToolHandler, ToolMetadata};
use async_trait::async_trait;
use herd_core::{HerdError, HerdResult, Parameters};
use herd_models::{ModelCommunicator, ModelConfig, ModelMessage};
use std::sync::Arc;

/// A tool backed by a registry model.
///
/// Sends `parameters.content` (or `parameters.query`) to the model endpoint.
/// An optional `task_id` string is forwarded, and any other parameters travel
/// as message metadata.
pub struct ModelTool {
    model_id: String,
    config: ModelConfig,
    communicator: Arc<ModelCommunicator>,
}

impl ModelTool {
    /// Tool forwarding to `model_id` through `communicator`.
    pub fn new(
        model_id: impl Into<String>,
        config: ModelConfig,
        communicator: Arc<ModelCommunicator>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            config,
            communicator,
        }
    }

    fn build_message(parameters: &Parameters) -> HerdResult<ModelMessage> {
        let content = ["content", "query"]
            .iter()
            .find_map(|key| parameters.get(*key).and_then(|v| v.as_str()))
            .ok_or_else(|| HerdError::handler("missing 'content' or 'query' parameter"))?;

        let mut message = ModelMessage::new(content);
        if let Some(task_id) = parameters.get("task_id").and_then(|v| v.as_str()) {
            message = message.with_task_id(task_id);
        }

        let extra: Parameters = parameters
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "content" | "query" | "task_id"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !extra.is_empty() {
            message = message.with_metadata(serde_json::Value::Object(extra));
        }
        Ok(message)
    }
}

#[async_trait]
impl ToolHandler for ModelTool {
    fn tool_id(&self) -> Option<&str> {
        Some(&self.model_id)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(&self.config.model_type).with_capabilities(self.config.capabilities.clone())
    }

    async fn execute(&self, parameters: &Parameters) -> HerdResult<serde_json::Value> {
        let message = Self::build_message(parameters)?;
        self.communicator.send_message(&self.model_id, &message).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_message_from_query_with_metadata() {
        let msg = ModelTool::build_message(&params(json!({
            "query": "coffee near campus",
            "task_id": "t-1",
            "radius_km": 2
        })))
        .unwrap();
        assert_eq!(msg.content, "coffee near campus");
        assert_eq!(msg.task_id.as_deref(), Some("t-1"));
        assert_eq!(msg.metadata.unwrap()["radius_km"], 2);
    }

    #[test]
    fn test_content_preferred_over_query() {
        let msg = ModelTool::build_message(&params(json!({
            "content": "explicit",
            "query": "original"
        })))
        .unwrap();
        assert_eq!(msg.content, "explicit");
        assert!(msg.metadata.is_none());
    }

    #[test]
    fn test_missing_content() {
        assert!(ModelTool::build_message(&Parameters::new()).is_err());
    }
}
