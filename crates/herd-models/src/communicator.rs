use crate::registry::ModelRegistry;
use futures_util::future::join_all;
use herd_core::{HerdError, HerdResult, RetryPolicy};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    30
}

/// Settings for [`ModelCommunicator`], read from the `[communicator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicatorConfig {
    /// Attempts per message before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on the retry delay.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-model overrides of `timeout_secs`.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            timeout_secs: default_timeout_secs(),
            timeouts: HashMap::new(),
        }
    }
}

impl CommunicatorConfig {
    /// Backoff policy for message retries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: Some(self.backoff_max_ms),
        }
    }
}

/// JSON body POSTed to a model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Text for the model.
    pub content: String,
    /// Task the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Extra structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ModelMessage {
    /// A message with no task id or metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            task_id: None,
            metadata: None,
        }
    }

    /// Tie the message to a task.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attach structured context.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

enum AttemptError {
    /// Worth another attempt: connection failures, timeouts, 5xx, 429.
    Transient(String),
    Fatal(String),
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Where and how long to wait for one model.
#[derive(Debug, Clone)]
struct Route {
    endpoint: String,
    /// Overrides the communicator-wide timeout.
    timeout: Option<Duration>,
}

/// Connection settings of one model, as reported by
/// [`ModelCommunicator::get_model_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    /// Registry id of the model.
    pub model_id: String,
    /// URL messages are POSTed to.
    pub endpoint: String,
    /// Timeout applied to each request unless the call overrides it.
    pub timeout: Duration,
}

/// HTTP client for model endpoints with exponential-backoff retries.
pub struct ModelCommunicator {
    routes: RwLock<HashMap<String, Route>>,
    http: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ModelCommunicator {
    /// `config.timeouts` entries apply to the matching endpoints.
    pub fn new(endpoints: HashMap<String, String>, config: &CommunicatorConfig) -> Self {
        let routes = endpoints
            .into_iter()
            .map(|(model_id, endpoint)| {
                let timeout = config.timeouts.get(&model_id).copied().map(Duration::from_secs);
                (model_id, Route { endpoint, timeout })
            })
            .collect();
        Self {
            routes: RwLock::new(routes),
            http: reqwest::Client::new(),
            policy: config.retry_policy(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// One endpoint per registry entry.
    pub fn from_registry(registry: &ModelRegistry, config: &CommunicatorConfig) -> Self {
        let endpoints = registry
            .models()
            .into_iter()
            .map(|(id, model)| (id, model.endpoint))
            .collect();
        Self::new(endpoints, config)
    }

    /// The backoff policy used between attempts.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// POST `message` to the endpoint of `model_id` and return the JSON reply.
    ///
    /// Transient failures are retried up to the policy's attempt budget with
    /// exponential backoff between attempts. Client errors and undecodable
    /// replies fail immediately.
    pub async fn send_message(
        &self,
        model_id: &str,
        message: &ModelMessage,
    ) -> HerdResult<serde_json::Value> {
        self.send_message_with_timeout(model_id, message, None).await
    }

    /// [`ModelCommunicator::send_message`] with each attempt bounded by
    /// `timeout` instead of the model's configured timeout.
    pub async fn send_message_with_timeout(
        &self,
        model_id: &str,
        message: &ModelMessage,
        timeout: Option<Duration>,
    ) -> HerdResult<serde_json::Value> {
        let route = self.route(model_id)?;
        let timeout = timeout.or(route.timeout).unwrap_or(self.timeout);
        let attempts = self.policy.max_retries.max(1);

        for attempt in 0..attempts {
            match self.post(&route.endpoint, message, timeout).await {
                Ok(reply) => {
                    debug!(model = %model_id, attempt = attempt + 1, "Model replied");
                    return Ok(reply);
                }
                Err(AttemptError::Fatal(msg)) => {
                    return Err(HerdError::Communication(format!(
                        "Error communicating with {model_id}: {msg}"
                    )));
                }
                Err(AttemptError::Transient(msg)) => {
                    warn!(
                        model = %model_id,
                        attempt = attempt + 1,
                        error = %msg,
                        "Transient error communicating with model"
                    );
                    if attempt + 1 == attempts {
                        return Err(HerdError::Communication(format!(
                            "Failed to communicate with {model_id}: {msg}"
                        )));
                    }
                    tokio::time::sleep(self.policy.delay(attempt)).await;
                }
            }
        }

        Err(HerdError::Communication(format!(
            "Failed to communicate with {model_id}"
        )))
    }

    /// Send `message` to every target concurrently.
    ///
    /// Only successful replies are returned; failures are logged.
    pub async fn broadcast_message(
        &self,
        targets: &[String],
        message: &ModelMessage,
    ) -> HashMap<String, serde_json::Value> {
        self.broadcast_message_with_timeout(targets, message, None).await
    }

    /// [`ModelCommunicator::broadcast_message`] with a timeout override
    /// applied to every target.
    pub async fn broadcast_message_with_timeout(
        &self,
        targets: &[String],
        message: &ModelMessage,
        timeout: Option<Duration>,
    ) -> HashMap<String, serde_json::Value> {
        let sends = targets.iter().map(|target| async move {
            let result = self
                .send_message_with_timeout(target, message, timeout)
                .await;
            (target.clone(), result)
        });

        let mut replies = HashMap::new();
        for (target, result) in join_all(sends).await {
            match result {
                Ok(reply) => {
                    replies.insert(target, reply);
                }
                Err(e) => warn!(model = %target, error = %e, "Broadcast to model failed"),
            }
        }
        replies
    }

    async fn post(
        &self,
        endpoint: &str,
        message: &ModelMessage,
        timeout: Duration,
    ) -> Result<serde_json::Value, AttemptError> {
        let resp = self
            .http
            .post(endpoint)
            .timeout(timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("HTTP {status}: {body}");
            return Err(if is_retryable_status(status) {
                AttemptError::Transient(msg)
            } else {
                AttemptError::Fatal(msg)
            });
        }

        resp.json()
            .await
            .map_err(|e| AttemptError::Fatal(format!("invalid JSON reply: {e}")))
    }

    fn route(&self, model_id: &str) -> HerdResult<Route> {
        self.routes.read().get(model_id).cloned().ok_or_else(|| {
            HerdError::Communication(format!("No endpoint configured for model {model_id}"))
        })
    }

    /// The URL messages for `model_id` are POSTed to.
    pub fn get_endpoint(&self, model_id: &str) -> HerdResult<String> {
        self.route(model_id).map(|route| route.endpoint)
    }

    /// Endpoint and effective timeout of `model_id`.
    pub fn get_model_status(&self, model_id: &str) -> HerdResult<ModelStatus> {
        let route = self.route(model_id)?;
        Ok(ModelStatus {
            model_id: model_id.to_string(),
            endpoint: route.endpoint,
            timeout: route.timeout.unwrap_or(self.timeout),
        })
    }

    /// Register `endpoint` for `model_id` with the default timeout.
    pub fn add_endpoint(&self, model_id: impl Into<String>, endpoint: impl Into<String>) {
        let (model_id, endpoint) = (model_id.into(), endpoint.into());
        info!(model = %model_id, endpoint = %endpoint, "Added model endpoint");
        self.routes.write().insert(
            model_id,
            Route {
                endpoint,
                timeout: None,
            },
        );
    }

    /// Set the per-request timeout of `model_id`.
    pub fn set_timeout(&self, model_id: &str, timeout: Duration) -> HerdResult<()> {
        let mut routes = self.routes.write();
        let route = routes.get_mut(model_id).ok_or_else(|| {
            HerdError::Communication(format!("No endpoint configured for model {model_id}"))
        })?;
        route.timeout = Some(timeout);
        info!(model = %model_id, timeout = ?timeout, "Updated model timeout");
        Ok(())
    }

    /// Returns `false` if no endpoint was configured for `model_id`.
    pub fn remove_endpoint(&self, model_id: &str) -> bool {
        let removed = self.routes.write().remove(model_id).is_some();
        if removed {
            info!(model = %model_id, "Removed model endpoint");
        }
        removed
    }

    /// Replace the endpoint of `model_id`, adding it if missing. A timeout
    /// set for the model is kept.
    pub fn update_endpoint(&self, model_id: impl Into<String>, endpoint: impl Into<String>) {
        let (model_id, endpoint) = (model_id.into(), endpoint.into());
        info!(model = %model_id, endpoint = %endpoint, "Updated model endpoint");
        self.routes
            .write()
            .entry(model_id)
            .and_modify(|route| route.endpoint.clone_from(&endpoint))
            .or_insert_with(|| Route {
                endpoint: endpoint.clone(),
                timeout: None,
            });
    }

    /// Configured model ids, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.routes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_management() {
        let comm = ModelCommunicator::new(HashMap::new(), &CommunicatorConfig::default());
        assert!(comm.get_endpoint("camina").is_err());

        comm.add_endpoint("camina", "http://localhost:6000/camina");
        assert_eq!(
            comm.get_endpoint("camina").unwrap(),
            "http://localhost:6000/camina"
        );

        comm.update_endpoint("camina", "http://localhost:7000/camina");
        assert_eq!(
            comm.get_endpoint("camina").unwrap(),
            "http://localhost:7000/camina"
        );

        assert!(comm.remove_endpoint("camina"));
        assert!(!comm.remove_endpoint("camina"));
    }

    #[test]
    fn test_model_status_reports_effective_timeout() {
        let config = CommunicatorConfig {
            timeouts: HashMap::from([("camina".to_string(), 90)]),
            ..CommunicatorConfig::default()
        };
        let endpoints = HashMap::from([
            ("camina".to_string(), "http://localhost:6000/camina".to_string()),
            ("scout".to_string(), "http://localhost:6001/scout".to_string()),
        ]);
        let comm = ModelCommunicator::new(endpoints, &config);

        assert_eq!(
            comm.get_model_status("camina").unwrap().timeout,
            Duration::from_secs(90)
        );
        assert_eq!(
            comm.get_model_status("scout").unwrap().timeout,
            Duration::from_secs(30)
        );

        comm.set_timeout("scout", Duration::from_secs(5)).unwrap();
        comm.update_endpoint("scout", "http://localhost:7001/scout");
        let status = comm.get_model_status("scout").unwrap();
        assert_eq!(status.endpoint, "http://localhost:7001/scout");
        assert_eq!(status.timeout, Duration::from_secs(5));

        assert!(comm.get_model_status("ghost").is_err());
        assert!(comm.set_timeout("ghost", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_from_registry() {
        let registry = ModelRegistry::new(None).unwrap();
        let comm = ModelCommunicator::from_registry(&registry, &CommunicatorConfig::default());
        assert_eq!(comm.model_ids().len(), 4);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = CommunicatorConfig::default().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_message_omits_empty_fields() {
        let json = serde_json::to_value(ModelMessage::new("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"content": "hi"}));
    }
}
