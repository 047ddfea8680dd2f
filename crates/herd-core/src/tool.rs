use crate::error::{HerdError, ToolErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named parameters passed to a tool handler.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

fn default_retry_count() -> u32 {
    3
}

/// A request to execute one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Registered id of the tool to run.
    pub tool_id: String,
    /// Named arguments for the handler.
    #[serde(default)]
    pub parameters: Parameters,
    /// Tools that must be registered before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-attempt time budget in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Attempt budget; zero is treated as one.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl ToolRequest {
    /// A request with no parameters and the default attempt budget.
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            parameters: Parameters::new(),
            dependencies: Vec::new(),
            timeout: None,
            retry_count: default_retry_count(),
        }
    }

    /// Replace all parameters.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add one parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Require `deps` to be registered.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Bound each attempt to `seconds`.
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Sets the attempt budget; values below one are raised to one.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    /// Number of attempts the router will make for this request.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// The timeout as a [`Duration`], ignoring negative or non-finite values.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Outcome of a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The tool produced a result.
    Success,
    /// Every attempt failed or the request was rejected.
    Error,
}

/// Timing details attached to a successful response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetrics {
    /// Wall-clock seconds spent in the successful attempt.
    pub execution_time: f64,
    /// One-based index of the attempt that succeeded.
    pub attempt: u32,
}

/// The result of routing a [`ToolRequest`] through the router.
///
/// Failures never surface as `Err`: they are reported with
/// `status == ToolStatus::Error` and a human-readable `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Tool the request was for.
    pub tool_id: String,
    /// Success or error.
    pub status: ToolStatus,
    /// Handler output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    /// Timing of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ResponseMetrics>,
}

impl ToolResponse {
    /// A successful response.
    pub fn success(
        tool_id: impl Into<String>,
        result: serde_json::Value,
        metrics: ResponseMetrics,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            status: ToolStatus::Success,
            result: Some(result),
            error: None,
            error_kind: None,
            metrics: Some(metrics),
        }
    }

    /// An error response describing `err`.
    pub fn failure(tool_id: impl Into<String>, err: &HerdError) -> Self {
        Self {
            tool_id: tool_id.into(),
            status: ToolStatus::Error,
            result: None,
            error: Some(err.to_string()),
            error_kind: Some(ToolErrorKind::from(err)),
            metrics: None,
        }
    }

    /// Whether the tool produced a result.
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Running execution statistics for one tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    /// Successful executions recorded.
    pub total_executions: u64,
    /// Sum of successful execution times in seconds.
    pub total_time: f64,
    /// `total_time / total_executions`.
    pub average_time: f64,
}

impl ToolMetrics {
    /// Fold one successful execution into the running totals.
    pub fn record(&mut self, execution_time: f64) {
        self.total_executions += 1;
        self.total_time += execution_time;
        self.average_time = self.total_time / self.total_executions as f64;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = ToolRequest::new("weather");
        assert_eq!(req.retry_count, 3);
        assert!(req.parameters.is_empty());
        assert!(req.timeout_duration().is_none());
    }

    #[test]
    fn test_retry_count_floor() {
        let req = ToolRequest::new("weather").with_retry_count(0);
        assert_eq!(req.retry_count, 1);

        let mut raw = ToolRequest::new("weather");
        raw.retry_count = 0;
        assert_eq!(raw.attempts(), 1);
    }

    #[test]
    fn test_invalid_timeout_ignored() {
        let req = ToolRequest::new("weather").with_timeout(-1.0);
        assert!(req.timeout_duration().is_none());
        let req = ToolRequest::new("weather").with_timeout(0.5);
        assert_eq!(req.timeout_duration(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_request_deserialize_defaults() {
        let req: ToolRequest = serde_json::from_str(r#"{"tool_id": "search"}"#).unwrap();
        assert_eq!(req.retry_count, 3);
        assert!(req.dependencies.is_empty());
    }

    #[test]
    fn test_failure_response_shape() {
        let resp = ToolResponse::failure("ghost", &HerdError::ToolNotFound("ghost".into()));
        assert!(!resp.is_success());
        assert_eq!(resp.error_kind, Some(ToolErrorKind::NotFound));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_metrics_average() {
        let mut m = ToolMetrics::default();
        m.record(1.0);
        m.record(3.0);
        assert_eq!(m.total_executions, 2);
        assert!((m.average_time - 2.0).abs() < f64::EPSILON);
    }
}
