use crate::config::HerdConfig;
use crate::observer::ObservationLog;
use crate::task_manager::TaskManager;
use herd_core::{
    Event, EventBus, EventManager, EventType, HerdError, HerdResult, ObservationEvent,
    ProgressStage, ToolResponse,
};
use herd_models::{ModelCommunicator, ModelRegistry};
use herd_tools::{SmartRouter, ToolCatalog, ToolDiscovery, ToolRouter};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The assembled dispatch engine.
///
/// Owns one instance of every component and wires them together: discovery
/// feeds the routers, tasks publish observations on the bus, and the
/// observation log keeps per-task history. Nothing is global; build one
/// `Herd` per process and pass it around.
pub struct Herd {
    config: HerdConfig,
    registry: Arc<ModelRegistry>,
    communicator: Arc<ModelCommunicator>,
    smart_router: Arc<SmartRouter>,
    discovery: ToolDiscovery,
    bus: Arc<EventBus<ObservationEvent>>,
    events: Arc<EventManager>,
    tasks: TaskManager,
    observations: ObservationLog,
}

impl Herd {
    /// Build every component from `config`. Tools are not discovered until
    /// [`Herd::start`].
    pub fn new(config: HerdConfig, catalog: ToolCatalog) -> HerdResult<Self> {
        let registry = Arc::new(ModelRegistry::new(config.registry.path.clone())?);
        let communicator = Arc::new(ModelCommunicator::from_registry(
            &registry,
            &config.communicator,
        ));

        let router = Arc::new(ToolRouter::with_policy(config.router.retry_policy()));
        let smart_router = Arc::new(if config.router.standard_capabilities {
            SmartRouter::with_standard_capabilities(router)?
        } else {
            SmartRouter::new(router)
        });
        let discovery = ToolDiscovery::new(
            config.discovery.tools_dir.clone(),
            Arc::clone(smart_router.router()),
            catalog,
        )
        .with_smart_router(Arc::clone(&smart_router))
        .with_excluded_dirs(config.discovery.excluded_dirs.clone());

        let bus = Arc::new(EventBus::new());
        let observations = ObservationLog::new();
        observations.attach(&bus);
        let tasks = TaskManager::new(Arc::clone(&bus), config.tasks.max_concurrent);

        Ok(Self {
            config,
            registry,
            communicator,
            smart_router,
            discovery,
            bus,
            events: Arc::new(EventManager::new()),
            tasks,
            observations,
        })
    }

    /// Load the TOML config at `path` and build from it.
    pub fn from_path(path: &Path, catalog: ToolCatalog) -> HerdResult<Self> {
        Self::new(HerdConfig::load(path)?, catalog)
    }

    /// Start the event bus and register tools: registry models first, then
    /// configured modules, then the tools directory. Later registrations
    /// replace earlier ones with the same id. Returns the number of tools
    /// registered.
    pub async fn start(&self) -> HerdResult<usize> {
        self.bus.start();

        let mut registered = 0;
        if self.config.discovery.register_models {
            registered += self
                .discovery
                .discover_models(&self.registry, Arc::clone(&self.communicator));
        }
        registered += self.discovery.discover_modules(&self.config.discovery.modules);
        registered += self.discovery.discover_tools()?;

        info!(
            tools = registered,
            max_concurrent = self.tasks.max_concurrent(),
            "Herd started"
        );
        Ok(registered)
    }

    /// Deliver pending observations, then stop the event bus.
    pub async fn stop(&self) {
        if self.bus.is_running() {
            self.bus.wait_idle().await;
        }
        self.bus.stop().await;
        info!("Herd stopped");
    }

    /// Route `query` and execute the chosen tool. No task is recorded.
    pub async fn execute_query(&self, query: &str) -> HerdResult<ToolResponse> {
        self.smart_router.execute_query(query).await
    }

    /// Run `query` as a tracked task of type `query`.
    ///
    /// Progress is reported to the event manager under the task id, with
    /// the resolved tool as component. A routing failure or an error
    /// response fails the task and is returned as `Err`.
    pub async fn dispatch(&self, query: &str) -> HerdResult<(Uuid, ToolResponse)> {
        let task_id = self.tasks.create_task(query, "query", HashMap::new()).await;
        let key = task_id.to_string();
        self.events.init_task(&key);

        let response = self
            .tasks
            .execute_task(task_id, || self.run_query(&key, query))
            .await?;
        Ok((task_id, response))
    }

    async fn run_query(&self, task_id: &str, query: &str) -> HerdResult<ToolResponse> {
        let request = match self.smart_router.route_request(query) {
            Ok(request) => request,
            Err(e) => {
                self.events
                    .emit(Event::new(
                        EventType::Error,
                        task_id,
                        "router",
                        ProgressStage::Failed,
                        e.to_string(),
                    ))
                    .await;
                return Err(e);
            }
        };

        let tool_id = request.tool_id.clone();
        self.events
            .emit(
                Event::new(
                    EventType::DrummerAssigned,
                    task_id,
                    tool_id.as_str(),
                    ProgressStage::DataGathering,
                    format!("Routed to {tool_id}"),
                )
                .with_progress(0.0),
            )
            .await;

        let response = self.smart_router.execute_tool(request).await;
        if response.is_success() {
            self.events
                .emit(
                    Event::new(
                        EventType::DrummerCompleted,
                        task_id,
                        tool_id.as_str(),
                        ProgressStage::Complete,
                        format!("{tool_id} completed"),
                    )
                    .with_progress(1.0),
                )
                .await;
            Ok(response)
        } else {
            let message = response.error.unwrap_or_default();
            self.events
                .emit(Event::new(
                    EventType::DrummerFailed,
                    task_id,
                    tool_id.as_str(),
                    ProgressStage::Failed,
                    message.as_str(),
                ))
                .await;
            Err(HerdError::Task(format!("Tool {tool_id} failed: {message}")))
        }
    }

    /// Drop finished tasks older than `tasks.retention_hours`, together with
    /// their progress, progress subscribers and observation history.
    /// Returns the number of tasks removed.
    pub fn cleanup_tasks(&self) -> usize {
        let removed = self
            .tasks
            .cleanup_completed_tasks(self.config.tasks.retention_hours);
        for id in &removed {
            let key = id.to_string();
            self.events.remove_task(&key);
            self.observations.clear_task_history(Some(&key));
        }
        removed.len()
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &HerdConfig {
        &self.config
    }

    /// Model catalog.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// HTTP client for model endpoints.
    pub fn communicator(&self) -> &Arc<ModelCommunicator> {
        &self.communicator
    }

    /// Tool registry shared by discovery and the smart router.
    pub fn router(&self) -> &Arc<ToolRouter> {
        self.smart_router.router()
    }

    /// Free-text query router.
    pub fn smart_router(&self) -> &Arc<SmartRouter> {
        &self.smart_router
    }

    /// Tool loader.
    pub fn discovery(&self) -> &ToolDiscovery {
        &self.discovery
    }

    /// Bus carrying task observations.
    pub fn bus(&self) -> &Arc<EventBus<ObservationEvent>> {
        &self.bus
    }

    /// Per-task progress tracker.
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Task lifecycle manager.
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Recorded observation history.
    pub fn observations(&self) -> &ObservationLog {
        &self.observations
    }
}
