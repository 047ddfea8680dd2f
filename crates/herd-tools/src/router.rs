use crate::handler::ToolHandler;
use futures_util::FutureExt;
use herd_core::{
    HerdError, HerdResult, Parameters, ResponseMetrics, RetryPolicy, ToolMetrics, ToolRequest,
    ToolResponse,
};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Registry of tool handlers that executes [`ToolRequest`]s with dependency
/// checks, retries and per-tool metrics.
///
/// `execute_tool` never returns an error: unknown tools, missing dependencies
/// and handler failures all come back as a [`ToolResponse`] with
/// `status == error`.
pub struct ToolRouter {
    handlers: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
    dependencies: RwLock<HashMap<String, BTreeSet<String>>>,
    metrics: RwLock<HashMap<String, ToolMetrics>>,
    policy: RetryPolicy,
}

impl ToolRouter {
    /// Router with the default backoff (1s base, doubling, uncapped).
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    /// Router with a custom backoff. Only the delay settings of `policy` are
    /// used; the attempt budget comes from each request's `retry_count`.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            dependencies: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Register `handler` under `tool_id`, replacing any previous handler.
    pub fn register_handler(&self, tool_id: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let tool_id = tool_id.into();
        info!(tool = %tool_id, "Registered tool handler");
        self.handlers.write().insert(tool_id, handler);
    }

    /// Remove and return the handler of `tool_id`.
    pub fn unregister_handler(&self, tool_id: &str) -> Option<Arc<dyn ToolHandler>> {
        let removed = self.handlers.write().remove(tool_id);
        if removed.is_some() {
            info!(tool = %tool_id, "Unregistered tool handler");
        }
        removed
    }

    /// Declare the tools `tool_id` needs registered before it may run.
    pub fn register_dependencies<I, S>(&self, tool_id: impl Into<String>, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tool_id = tool_id.into();
        let deps: BTreeSet<String> = deps.into_iter().map(Into::into).collect();
        info!(tool = %tool_id, dependencies = ?deps, "Registered tool dependencies");
        self.dependencies.write().insert(tool_id, deps);
    }

    /// Whether `tool_id` is registered.
    pub fn has_handler(&self, tool_id: &str) -> bool {
        self.handlers.read().contains_key(tool_id)
    }

    /// The handler registered for `tool_id`.
    pub fn handler(&self, tool_id: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.read().get(tool_id).cloned()
    }

    /// Registered tool ids, sorted.
    pub fn tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `request` against its handler.
    ///
    /// The handler is attempted up to `retry_count` times with exponential
    /// backoff between failed attempts. When `timeout` is set, each attempt is
    /// bounded by it and an elapsed attempt counts as a failure.
    pub async fn execute_tool(&self, request: ToolRequest) -> ToolResponse {
        match self.run(&request).await {
            Ok((result, metrics)) => ToolResponse::success(request.tool_id, result, metrics),
            Err(e) => {
                error!(tool = %request.tool_id, error = %e, "Tool execution failed");
                ToolResponse::failure(request.tool_id, &e)
            }
        }
    }

    async fn run(&self, request: &ToolRequest) -> HerdResult<(serde_json::Value, ResponseMetrics)> {
        let handler = self
            .handler(&request.tool_id)
            .ok_or_else(|| HerdError::ToolNotFound(request.tool_id.clone()))?;
        self.check_dependencies(request)?;

        let attempts = request.attempts();
        let timeout = request.timeout_duration();
        let mut last_error = None;

        for attempt in 0..attempts {
            let started = Instant::now();
            match attempt_once(handler.as_ref(), &request.parameters, timeout).await {
                Ok(result) => {
                    let execution_time = started.elapsed().as_secs_f64();
                    self.metrics
                        .write()
                        .entry(request.tool_id.clone())
                        .or_default()
                        .record(execution_time);
                    return Ok((
                        result,
                        ResponseMetrics {
                            execution_time,
                            attempt: attempt + 1,
                        },
                    ));
                }
                Err(e) => {
                    warn!(
                        tool = %request.tool_id,
                        attempt = attempt + 1,
                        of = attempts,
                        error = %e,
                        "Tool attempt failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HerdError::handler("no attempts made")))
    }

    fn check_dependencies(&self, request: &ToolRequest) -> HerdResult<()> {
        let mut required: BTreeSet<String> = self
            .dependencies
            .read()
            .get(&request.tool_id)
            .cloned()
            .unwrap_or_default();
        required.extend(request.dependencies.iter().cloned());

        let handlers = self.handlers.read();
        let missing: Vec<String> = required
            .into_iter()
            .filter(|dep| !handlers.contains_key(dep))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HerdError::Dependency {
                tool_id: request.tool_id.clone(),
                missing,
            })
        }
    }

    /// Metrics for one tool, or for every tool when `tool_id` is `None`.
    pub fn get_metrics(&self, tool_id: Option<&str>) -> HashMap<String, ToolMetrics> {
        let metrics = self.metrics.read();
        match tool_id {
            Some(id) => metrics
                .get(id)
                .map(|m| HashMap::from([(id.to_string(), *m)]))
                .unwrap_or_default(),
            None => metrics.clone(),
        }
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

async fn attempt_once(
    handler: &dyn ToolHandler,
    parameters: &Parameters,
    timeout: Option<Duration>,
) -> HerdResult<serde_json::Value> {
    let call = AssertUnwindSafe(handler.execute(parameters)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            HerdError::Timeout(format!("attempt exceeded {:.3}s", limit.as_secs_f64()))
        })?,
        None => call.await,
    };
    outcome.unwrap_or_else(|panic| Err(HerdError::from_panic(panic.as_ref())))
}
