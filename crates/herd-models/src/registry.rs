use herd_core::{HerdError, HerdResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration of one model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Role of the model, e.g. `primary`, `belter` or `drummer`.
    #[serde(rename = "type")]
    pub model_type: String,
    /// Underlying model name, e.g. `llama-3b`.
    pub base_model: String,
    /// URL the communicator POSTs messages to.
    pub endpoint: String,
    /// Capability tags used for lookups.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelConfig {
    /// Build a config from borrowed capability names.
    pub fn new(
        model_type: impl Into<String>,
        base_model: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: &[&str],
    ) -> Self {
        Self {
            model_type: model_type.into(),
            base_model: base_model.into(),
            endpoint: endpoint.into(),
            capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Whether `capability` is among the model's tags.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

type ModelMap = BTreeMap<String, ModelConfig>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Yaml,
    Toml,
}

impl FileFormat {
    fn of(path: &Path) -> HerdResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(FileFormat::Yaml),
            Some("toml") => Ok(FileFormat::Toml),
            _ => Err(HerdError::Config(format!(
                "unsupported model registry format: {}",
                path.display()
            ))),
        }
    }

    fn parse(self, text: &str) -> HerdResult<ModelMap> {
        match self {
            FileFormat::Yaml => {
                serde_yaml_ng::from_str(text).map_err(|e| HerdError::Config(e.to_string()))
            }
            FileFormat::Toml => toml::from_str(text).map_err(|e| HerdError::Config(e.to_string())),
        }
    }

    fn render(self, models: &ModelMap) -> HerdResult<String> {
        match self {
            FileFormat::Yaml => {
                serde_yaml_ng::to_string(models).map_err(|e| HerdError::Config(e.to_string()))
            }
            FileFormat::Toml => {
                toml::to_string_pretty(models).map_err(|e| HerdError::Config(e.to_string()))
            }
        }
    }
}

/// The four built-in models, with endpoints resolved through `lookup`
/// (normally the process environment).
pub fn default_models_with(lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, ModelConfig> {
    let endpoint = |var: &str, fallback: &str| lookup(var).unwrap_or_else(|| fallback.to_string());

    let mut models = BTreeMap::new();
    models.insert(
        "camina".to_string(),
        ModelConfig::new(
            "primary",
            "mistral-22b",
            endpoint("CAMINA_ENDPOINT", "http://localhost:6000/camina"),
            &["orchestration", "conversation", "planning"],
        ),
    );
    models.insert(
        "property_belter".to_string(),
        ModelConfig::new(
            "belter",
            "mistral-7b",
            endpoint("PROPERTY_BELTER_ENDPOINT", "http://localhost:6001/belter"),
            &["real_estate", "location_analysis", "market_research"],
        ),
    );
    models.insert(
        "knowledge_belter".to_string(),
        ModelConfig::new(
            "belter",
            "mistral-7b",
            endpoint("KNOWLEDGE_BELTER_ENDPOINT", "http://localhost:6002/belter"),
            &["knowledge_base", "fact_checking", "research"],
        ),
    );
    models.insert(
        "location_drummer".to_string(),
        ModelConfig::new(
            "drummer",
            "llama-3b",
            endpoint("LOCATION_DRUMMER_ENDPOINT", "http://localhost:6003/drummer"),
            &["location_services", "mapping", "navigation"],
        ),
    );
    models
}

/// Catalog of model endpoint configurations.
///
/// Backed by an optional YAML or TOML file (`model_id -> {type, base_model,
/// endpoint, capabilities}`). When the file is absent the built-in defaults
/// are used and `save_config` creates it.
pub struct ModelRegistry {
    models: RwLock<ModelMap>,
    config_path: Option<PathBuf>,
}

impl ModelRegistry {
    /// Load from `config_path` if it exists, otherwise start from the defaults.
    pub fn new(config_path: Option<PathBuf>) -> HerdResult<Self> {
        let registry = Self {
            models: RwLock::new(ModelMap::new()),
            config_path,
        };
        match registry.config_path.clone() {
            Some(path) if path.exists() => registry.load_config(&path)?,
            _ => *registry.models.write() = default_models_with(|var| std::env::var(var).ok()),
        }
        Ok(registry)
    }

    /// An empty registry with no backing file.
    pub fn empty() -> Self {
        Self {
            models: RwLock::new(ModelMap::new()),
            config_path: None,
        }
    }

    /// Replace the current models with the contents of `path`.
    pub fn load_config(&self, path: &Path) -> HerdResult<()> {
        let format = FileFormat::of(path)?;
        let text = std::fs::read_to_string(path).map_err(|e| {
            HerdError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        let models = format.parse(&text)?;
        info!(count = models.len(), path = %path.display(), "Loaded models");
        *self.models.write() = models;
        Ok(())
    }

    /// Configuration of `model_id`.
    pub fn get_model(&self, model_id: &str) -> HerdResult<ModelConfig> {
        self.models
            .read()
            .get(model_id)
            .cloned()
            .ok_or_else(|| HerdError::ModelNotFound(model_id.to_string()))
    }

    /// Insert or replace a model.
    pub fn register_model(&self, model_id: impl Into<String>, config: ModelConfig) {
        let model_id = model_id.into();
        info!(model = %model_id, "Registered model");
        self.models.write().insert(model_id, config);
    }

    /// Models whose `type` equals `model_type`.
    pub fn get_models_by_type(&self, model_type: &str) -> BTreeMap<String, ModelConfig> {
        self.filter(|c| c.model_type == model_type)
    }

    /// Models tagged with `capability`.
    pub fn get_models_by_capability(&self, capability: &str) -> BTreeMap<String, ModelConfig> {
        self.filter(|c| c.has_capability(capability))
    }

    /// Snapshot of every registered model.
    pub fn models(&self) -> BTreeMap<String, ModelConfig> {
        self.models.read().clone()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Whether no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// File the registry loads from and saves to.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write the current models back to the backing file.
    ///
    /// Without a backing file this only logs a warning.
    pub fn save_config(&self) -> HerdResult<()> {
        let Some(path) = &self.config_path else {
            warn!("No config path set, cannot save model registry");
            return Ok(());
        };
        let format = FileFormat::of(path)?;
        let text = format.render(&self.models.read())?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "Saved model registry");
        Ok(())
    }

    fn filter(&self, pred: impl Fn(&ModelConfig) -> bool) -> BTreeMap<String, ModelConfig> {
        self.models
            .read()
            .iter()
            .filter(|(_, c)| pred(c))
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect()
    }
}
