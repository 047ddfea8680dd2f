use crate::catalog::{ModuleEntryPoint, ToolCatalog};
use crate::handler::{ToolHandler, ToolMetadata};
use crate::model_tool::ModelTool;
use crate::router::ToolRouter;
use crate::smart_router::SmartRouter;
use herd_core::{HerdError, HerdResult};
use herd_models::{ModelCommunicator, ModelRegistry};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn default_enabled() -> bool {
    true
}

/// A tool manifest (`*.toml`) found in the tools directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolManifest {
    /// Catalog module to load. Defaults to the manifest's dotted path
    /// relative to the parent of the tools directory.
    #[serde(default)]
    pub module: Option<String>,
    /// Disabled manifests are skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Passed to every entry factory of the module.
    #[serde(default)]
    pub settings: toml::Table,
}

/// A tool registered by discovery.
#[derive(Clone)]
pub struct DiscoveredTool {
    /// Id the handler is registered under.
    pub tool_id: String,
    /// Catalog module it came from.
    pub module: String,
    /// Grouping metadata reported by the handler.
    pub metadata: ToolMetadata,
    /// The registered handler.
    pub handler: Arc<dyn ToolHandler>,
}

impl DiscoveredTool {
    /// Shorthand for `metadata.category`.
    pub fn category(&self) -> &str {
        &self.metadata.category
    }
}

/// Finds tool modules and registers their handlers with a router.
///
/// Modules come from a [`ToolCatalog`] of registration entry points; the
/// tools directory holds manifests selecting which modules to load. Failures
/// are isolated per manifest and per entry: one broken tool is logged and
/// skipped without affecting the rest.
pub struct ToolDiscovery {
    tools_dir: Option<PathBuf>,
    router: Arc<ToolRouter>,
    smart_router: Option<Arc<SmartRouter>>,
    excluded_dirs: BTreeSet<String>,
    catalog: ToolCatalog,
    tools: RwLock<BTreeMap<String, DiscoveredTool>>,
    categories: RwLock<BTreeSet<String>>,
}

impl ToolDiscovery {
    /// Discovery over `tools_dir` registering into `router`.
    pub fn new(tools_dir: Option<PathBuf>, router: Arc<ToolRouter>, catalog: ToolCatalog) -> Self {
        Self {
            tools_dir,
            router,
            smart_router: None,
            excluded_dirs: ["tests", "target"].iter().map(|d| (*d).to_string()).collect(),
            catalog,
            tools: RwLock::new(BTreeMap::new()),
            categories: RwLock::new(BTreeSet::new()),
        }
    }

    /// Also register each discovered handler's capability for free-text routing.
    /// Handlers are then registered on the smart router's underlying router.
    pub fn with_smart_router(mut self, smart_router: Arc<SmartRouter>) -> Self {
        self.router = Arc::clone(smart_router.router());
        self.smart_router = Some(smart_router);
        self
    }

    /// Replace the directory names skipped while scanning.
    pub fn with_excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Walk the tools directory and load every enabled manifest.
    ///
    /// Returns the number of tools registered by this pass. A missing
    /// directory is logged and yields zero.
    pub fn discover_tools(&self) -> HerdResult<usize> {
        let Some(root) = &self.tools_dir else {
            debug!("No tools directory configured");
            return Ok(0);
        };
        if !root.is_dir() {
            warn!(dir = %root.display(), "Tools directory does not exist");
            return Ok(0);
        }

        let mut manifests = Vec::new();
        self.collect_manifests(root, &mut manifests);

        let base = root.parent().unwrap_or(Path::new(""));
        let mut registered = 0;
        for manifest_path in manifests {
            match self.load_manifest(base, &manifest_path) {
                Ok(count) => registered += count,
                Err(e) => {
                    error!(manifest = %manifest_path.display(), error = %e, "Failed to load tool module");
                }
            }
        }

        info!(
            tools = self.tools.read().len(),
            categories = self.categories.read().len(),
            "Tool discovery complete"
        );
        Ok(registered)
    }

    /// Load catalog modules by path with empty settings, bypassing the
    /// directory walk. Unknown modules are logged and skipped.
    pub fn discover_modules(&self, modules: &[String]) -> usize {
        let mut registered = 0;
        for module in modules {
            match self.catalog.entry_point(module) {
                Some(entry_point) => {
                    registered += self.register_module(module, entry_point, &toml::Table::new());
                }
                None => warn!(module = %module, "No registration entry point for module"),
            }
        }
        registered
    }

    /// Register one [`ModelTool`] per registry model, using the model id as
    /// tool id and the model type as category.
    pub fn discover_models(
        &self,
        registry: &ModelRegistry,
        communicator: Arc<ModelCommunicator>,
    ) -> usize {
        let mut registered = 0;
        for (model_id, config) in registry.models() {
            let tool = ModelTool::new(model_id, config, Arc::clone(&communicator));
            self.register("models", Arc::new(tool), None);
            registered += 1;
        }
        registered
    }

    fn collect_manifests(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Failed to scan tools directory");
                return;
            }
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_dir() {
                if self.excluded_dirs.contains(name) || name.starts_with('_') || name.starts_with('.') {
                    debug!(dir = %path.display(), "Skipping directory");
                    continue;
                }
                self.collect_manifests(&path, out);
            } else if path.extension().is_some_and(|ext| ext == "toml") && !name.starts_with('_') {
                out.push(path);
            }
        }
    }

    fn load_manifest(&self, base: &Path, path: &Path) -> HerdResult<usize> {
        let text = std::fs::read_to_string(path)?;
        let manifest: ToolManifest = toml::from_str(&text)
            .map_err(|e| HerdError::Config(format!("invalid manifest: {e}")))?;
        if !manifest.enabled {
            debug!(manifest = %path.display(), "Manifest disabled");
            return Ok(0);
        }

        let module = match manifest.module {
            Some(module) => module,
            None => module_path(base, path)?,
        };
        let entry_point = self.catalog.entry_point(&module).ok_or_else(|| {
            HerdError::Config(format!("no registration entry point for module {module}"))
        })?;
        Ok(self.register_module(&module, entry_point, &manifest.settings))
    }

    fn register_module(
        &self,
        module: &str,
        entry_point: ModuleEntryPoint,
        settings: &toml::Table,
    ) -> usize {
        let entries = match std::panic::catch_unwind(entry_point) {
            Ok(entries) => entries,
            Err(panic) => {
                error!(module = %module, error = %HerdError::from_panic(panic.as_ref()), "Tool module failed to load");
                return 0;
            }
        };

        let mut registered = 0;
        for entry in entries {
            let built = std::panic::catch_unwind(AssertUnwindSafe(|| entry.instantiate(settings)))
                .unwrap_or_else(|panic| Err(HerdError::from_panic(panic.as_ref())));
            match built {
                Ok(handler) => {
                    let fallback = format!("{module}.{}", entry.name);
                    self.register(module, handler, Some(fallback));
                    registered += 1;
                }
                Err(e) => {
                    error!(module = %module, entry = %entry.name, error = %e, "Error instantiating tool");
                }
            }
        }
        registered
    }

    fn register(&self, module: &str, handler: Arc<dyn ToolHandler>, fallback_id: Option<String>) {
        let tool_id = handler
            .tool_id()
            .map(str::to_string)
            .or(fallback_id)
            .unwrap_or_else(|| module.to_string());
        let metadata = handler.metadata();

        self.router.register_handler(tool_id.clone(), Arc::clone(&handler));
        if let (Some(smart), Some(capability)) = (&self.smart_router, handler.capability()) {
            if let Err(e) = smart.register_capability(tool_id.clone(), capability) {
                warn!(tool = %tool_id, error = %e, "Failed to register tool capability");
            }
        }

        info!(tool = %tool_id, category = %metadata.category, "Discovered tool");
        self.categories.write().insert(metadata.category.clone());
        self.tools.write().insert(
            tool_id.clone(),
            DiscoveredTool {
                tool_id,
                module: module.to_string(),
                metadata,
                handler,
            },
        );
    }

    /// A discovered tool by id.
    pub fn get_tool(&self, tool_id: &str) -> Option<DiscoveredTool> {
        self.tools.read().get(tool_id).cloned()
    }

    /// Discovered tools in `category`, keyed by id.
    pub fn get_tools_by_category(&self, category: &str) -> BTreeMap<String, DiscoveredTool> {
        self.tools
            .read()
            .iter()
            .filter(|(_, t)| t.category() == category)
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect()
    }

    /// Known categories, sorted.
    pub fn get_categories(&self) -> Vec<String> {
        self.categories.read().iter().cloned().collect()
    }
}

/// `tools/weather/forecast.toml` relative to the parent of `tools` becomes
/// `tools.weather.forecast`.
fn module_path(base: &Path, path: &Path) -> HerdResult<String> {
    let relative = path.strip_prefix(base).unwrap_or(path).with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()
        .ok_or_else(|| HerdError::Config(format!("non UTF-8 path: {}", path.display())))?;
    Ok(parts.join("."))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_module_path() {
        let base = Path::new("/srv/app");
        let path = Path::new("/srv/app/tools/weather/forecast.toml");
        assert_eq!(module_path(base, path).unwrap(), "tools.weather.forecast");
    }

    #[test]
    fn test_missing_dir_is_not_fatal() {
        let discovery = ToolDiscovery::new(
            Some(PathBuf::from("/definitely/not/here")),
            Arc::new(ToolRouter::new()),
            ToolCatalog::new(),
        );
        assert_eq!(discovery.discover_tools().unwrap(), 0);
        assert!(discovery.get_categories().is_empty());
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: ToolManifest = toml::from_str("").unwrap();
        assert!(manifest.enabled);
        assert!(manifest.module.is_none());
        assert!(manifest.settings.is_empty());
    }
}
