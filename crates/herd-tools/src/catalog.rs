use crate::handler::ToolHandler;
use herd_core::HerdResult;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a handler from the `settings` table of its manifest.
pub type ToolFactory = Box<dyn Fn(&toml::Table) -> HerdResult<Arc<dyn ToolHandler>> + Send + Sync>;

/// Registration entry point every tool module exposes.
pub type ModuleEntryPoint = fn() -> Vec<ToolEntry>;

/// One tool a module can provide.
pub struct ToolEntry {
    /// Name within the module; `"{module}.{name}"` is the fallback tool id.
    pub name: String,
    factory: ToolFactory,
}

impl ToolEntry {
    /// Entry built by `factory` from manifest settings.
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&toml::Table) -> HerdResult<Arc<dyn ToolHandler>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    /// Entry for a handler that takes no settings.
    pub fn simple<H, F>(name: impl Into<String>, make: F) -> Self
    where
        H: ToolHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self::new(name, move |_| Ok(Arc::new(make()) as Arc<dyn ToolHandler>))
    }

    /// Build the handler with `settings`.
    pub fn instantiate(&self, settings: &toml::Table) -> HerdResult<Arc<dyn ToolHandler>> {
        (self.factory)(settings)
    }
}

/// Compile-time list of tool modules, keyed by dotted module path
/// (e.g. `tools.weather.forecast`).
///
/// Discovery only instantiates modules present here; a manifest on disk
/// selects which of them to load and with what settings.
#[derive(Default)]
pub struct ToolCatalog {
    modules: BTreeMap<String, ModuleEntryPoint>,
}

impl ToolCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ToolCatalog::register_module`].
    pub fn with_module(mut self, module: impl Into<String>, entry_point: ModuleEntryPoint) -> Self {
        self.register_module(module, entry_point);
        self
    }

    /// Add or replace the entry point of `module`.
    pub fn register_module(&mut self, module: impl Into<String>, entry_point: ModuleEntryPoint) {
        self.modules.insert(module.into(), entry_point);
    }

    /// Entry point of `module`, if cataloged.
    pub fn entry_point(&self, module: &str) -> Option<ModuleEntryPoint> {
        self.modules.get(module).copied()
    }

    /// Cataloged module paths, sorted.
    pub fn modules(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// Number of cataloged modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is cataloged.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use herd_core::Parameters;

    struct Constant(i64);

    #[async_trait]
    impl ToolHandler for Constant {
        async fn execute(&self, _parameters: &Parameters) -> HerdResult<serde_json::Value> {
            Ok(serde_json::json!(self.0))
        }
    }

    fn math_module() -> Vec<ToolEntry> {
        vec![
            ToolEntry::simple("zero", || Constant(0)),
            ToolEntry::new("configured", |settings| {
                let value = settings
                    .get("value")
                    .and_then(toml::Value::as_integer)
                    .unwrap_or(1);
                Ok(Arc::new(Constant(value)) as Arc<dyn ToolHandler>)
            }),
        ]
    }

    #[tokio::test]
    async fn test_entries_instantiate_with_settings() {
        let catalog = ToolCatalog::new().with_module("tools.math", math_module);
        let entries = catalog.entry_point("tools.math").unwrap()();
        assert_eq!(entries.len(), 2);

        let mut settings = toml::Table::new();
        settings.insert("value".into(), toml::Value::Integer(42));
        let handler = entries[1].instantiate(&settings).unwrap();
        let out = handler.execute(&Parameters::new()).await.unwrap();
        assert_eq!(out, serde_json::json!(42));
    }

    #[test]
    fn test_unknown_module() {
        let catalog = ToolCatalog::new();
        assert!(catalog.entry_point("tools.nope").is_none());
        assert!(catalog.is_empty());
    }
}
