#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for ToolDiscovery.
//!
//! These tests build a tools directory of manifests in a temp dir and check
//! that discovery registers every healthy tool while isolating broken ones.

use async_trait::async_trait;
use herd_core::{HerdError, HerdResult, Parameters, ToolRequest};
use herd_models::{CommunicatorConfig, ModelCommunicator, ModelConfig, ModelRegistry};
use herd_tools::*;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fixture tool modules
// ---------------------------------------------------------------------------

struct Forecast {
    unit: String,
}

#[async_trait]
impl ToolHandler for Forecast {
    fn tool_id(&self) -> Option<&str> {
        Some("weather")
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("environment")
    }

    fn capability(&self) -> Option<ToolCapability> {
        Some(
            ToolCapability::new("Weather", "Current conditions")
                .with_keywords(&["weather", "forecast"])
                .with_examples(&["What is the weather in {city}"]),
        )
    }

    async fn execute(&self, _parameters: &Parameters) -> HerdResult<serde_json::Value> {
        Ok(serde_json::json!({"temp": 72, "unit": self.unit}))
    }
}

struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    async fn execute(&self, parameters: &Parameters) -> HerdResult<serde_json::Value> {
        Ok(serde_json::Value::Object(parameters.clone()))
    }
}

fn weather_module() -> Vec<ToolEntry> {
    vec![ToolEntry::new("Forecast", |settings| {
        let unit = settings
            .get("unit")
            .and_then(|v| v.as_str())
            .unwrap_or("F")
            .to_string();
        Ok(Arc::new(Forecast { unit }) as Arc<dyn ToolHandler>)
    })]
}

fn text_module() -> Vec<ToolEntry> {
    vec![
        ToolEntry::simple("Echo", || Echo),
        ToolEntry::new("Broken", |_| Err(HerdError::Config("needs an api key".into()))),
        ToolEntry::new("Explodes", |_| panic!("constructor panicked")),
    ]
}

fn panicking_module() -> Vec<ToolEntry> {
    panic!("module init failed")
}

fn catalog() -> ToolCatalog {
    ToolCatalog::new()
        .with_module("tools.weather.forecast", weather_module)
        .with_module("tools.text", text_module)
        .with_module("tools.bad", panicking_module)
}

fn write(root: &Path, rel: &str, contents: &str) {
    let file = root.join(rel);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, contents).unwrap();
}

fn tools_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "tools/weather/forecast.toml", "[settings]\nunit = \"C\"\n");
    write(root, "tools/misc.toml", "module = \"tools.text\"\n");
    write(root, "tools/bad.toml", "");
    write(root, "tools/broken_syntax.toml", "this is = = not toml");
    write(root, "tools/unknown.toml", "");
    write(root, "tools/off.toml", "module = \"tools.text\"\nenabled = false\n");
    write(root, "tools/_private/hidden.toml", "module = \"tools.text\"\n");
    write(root, "tools/tests/fixture.toml", "module = \"tools.text\"\n");
    write(root, "tools/_draft.toml", "module = \"tools.text\"\n");
    write(root, "tools/README.md", "not a manifest");
    dir
}

// ---------------------------------------------------------------------------
// 1. Directory walk registers healthy tools and isolates failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovers_tools_and_skips_broken_modules() {
    let dir = tools_tree();
    let router = Arc::new(ToolRouter::new());
    let discovery = ToolDiscovery::new(Some(dir.path().join("tools")), Arc::clone(&router), catalog());

    let registered = discovery.discover_tools().unwrap();
    assert_eq!(registered, 2);
    assert_eq!(router.tool_ids(), vec!["tools.text.Echo", "weather"]);

    let weather = discovery.get_tool("weather").unwrap();
    assert_eq!(weather.module, "tools.weather.forecast");
    assert_eq!(weather.category(), "environment");

    let echo = discovery.get_tool("tools.text.Echo").unwrap();
    assert_eq!(echo.category(), "general");

    assert_eq!(discovery.get_categories(), vec!["environment", "general"]);
    assert_eq!(discovery.get_tools_by_category("general").len(), 1);
    assert!(discovery.get_tools_by_category("finance").is_empty());

    // Manifest settings reach the factory.
    let resp = router.execute_tool(ToolRequest::new("weather")).await;
    assert_eq!(resp.result.unwrap()["unit"], "C");
}

#[test]
fn excluded_dirs_are_configurable() {
    let dir = tools_tree();
    let discovery = ToolDiscovery::new(
        Some(dir.path().join("tools")),
        Arc::new(ToolRouter::new()),
        catalog(),
    )
    .with_excluded_dirs(Vec::<String>::new());

    // tests/ is now walked, _private/ stays hidden.
    assert_eq!(discovery.discover_tools().unwrap(), 3);
    assert!(discovery.get_tool("tools.text.Echo").is_some());
}

// ---------------------------------------------------------------------------
// 2. Capabilities flow into the smart router
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovered_capabilities_enable_free_text_routing() {
    let dir = tools_tree();
    let smart = Arc::new(SmartRouter::new(Arc::new(ToolRouter::new())));
    let discovery = ToolDiscovery::new(
        Some(dir.path().join("tools")),
        Arc::new(ToolRouter::new()),
        catalog(),
    )
    .with_smart_router(Arc::clone(&smart));
    discovery.discover_tools().unwrap();

    let resp = smart
        .execute_query("What is the weather in Lisbon")
        .await
        .unwrap();
    assert!(resp.is_success());
    assert_eq!(resp.tool_id, "weather");
}

// ---------------------------------------------------------------------------
// 3. Direct module loading
// ---------------------------------------------------------------------------

#[test]
fn discover_modules_without_directory() {
    let router = Arc::new(ToolRouter::new());
    let discovery = ToolDiscovery::new(None, Arc::clone(&router), catalog());
    assert_eq!(discovery.discover_tools().unwrap(), 0);

    let count = discovery.discover_modules(&[
        "tools.weather.forecast".to_string(),
        "tools.missing".to_string(),
        "tools.bad".to_string(),
    ]);
    assert_eq!(count, 1);
    assert!(router.has_handler("weather"));
}

// ---------------------------------------------------------------------------
// 4. Registry models become tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_models_are_registered_as_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drummer"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "success", "content": "3 cafes"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = ModelRegistry::empty();
    registry.register_model(
        "location_drummer",
        ModelConfig::new(
            "drummer",
            "llama-3b",
            format!("{}/drummer", server.uri()),
            &["mapping"],
        ),
    );
    let communicator = Arc::new(ModelCommunicator::from_registry(
        &registry,
        &CommunicatorConfig::default(),
    ));

    let router = Arc::new(ToolRouter::new());
    let discovery = ToolDiscovery::new(None, Arc::clone(&router), ToolCatalog::new());
    assert_eq!(discovery.discover_models(&registry, communicator), 1);

    let tool = discovery.get_tool("location_drummer").unwrap();
    assert_eq!(tool.category(), "drummer");
    assert_eq!(tool.metadata.capabilities, vec!["mapping"]);

    let resp = router
        .execute_tool(
            ToolRequest::new("location_drummer")
                .with_parameter("query", serde_json::json!("coffee near campus")),
        )
        .await;
    assert!(resp.is_success());
    assert_eq!(resp.result.unwrap()["content"], "3 cafes");
}
