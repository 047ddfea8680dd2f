#![allow(clippy::unwrap_used, clippy::expect_used)]

use herd_core::HerdError;
use herd_models::*;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn instant_config() -> CommunicatorConfig {
    CommunicatorConfig {
        max_retries: 3,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        timeout_secs: 5,
        timeouts: HashMap::new(),
    }
}

fn communicator_for(server: &MockServer, model: &str) -> ModelCommunicator {
    let mut endpoints = HashMap::new();
    endpoints.insert(model.to_string(), format!("{}/{model}", server.uri()));
    ModelCommunicator::new(endpoints, &instant_config())
}

// ---------------------------------------------------------------------------
// 1. Successful round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_message_posts_json_and_returns_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/camina"))
        .and(body_json(serde_json::json!({"content": "hello", "task_id": "t1"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "success"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let comm = communicator_for(&server, "camina");
    let reply = comm
        .send_message("camina", &ModelMessage::new("hello").with_task_id("t1"))
        .await
        .unwrap();
    assert_eq!(reply["status"], "success");
}

// ---------------------------------------------------------------------------
// 2. Transient failures are retried
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_then_success_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/belter"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/belter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let comm = communicator_for(&server, "belter");
    let reply = comm
        .send_message("belter", &ModelMessage::new("ping"))
        .await
        .unwrap();
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn persistent_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/belter"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let comm = communicator_for(&server, "belter");
    let err = comm
        .send_message("belter", &ModelMessage::new("ping"))
        .await
        .unwrap_err();
    assert!(matches!(err, HerdError::Communication(_)));
    assert!(err.to_string().contains("belter"));
}

// ---------------------------------------------------------------------------
// 3. Client errors fail fast
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drummer"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let comm = communicator_for(&server, "drummer");
    let err = comm
        .send_message("drummer", &ModelMessage::new("ping"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn unknown_model_fails_without_request() {
    let server = MockServer::start().await;
    let comm = communicator_for(&server, "camina");
    let err = comm
        .send_message("ghost", &ModelMessage::new("ping"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No endpoint configured for model ghost"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// 4. Broadcast keeps only successful replies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_returns_successes_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"from": "good"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut endpoints = HashMap::new();
    endpoints.insert("good".to_string(), format!("{}/good", server.uri()));
    endpoints.insert("bad".to_string(), format!("{}/bad", server.uri()));
    let comm = ModelCommunicator::new(endpoints, &instant_config());

    let replies = comm
        .broadcast_message(
            &["good".to_string(), "bad".to_string(), "missing".to_string()],
            &ModelMessage::new("status?"),
        )
        .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies["good"]["from"], "good");
}

// ---------------------------------------------------------------------------
// 5. Registry file round trip through the communicator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_file_feeds_communicator_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/research"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"answer": 42})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("models.yaml");
    let registry = ModelRegistry::new(Some(file.clone())).unwrap();
    registry.register_model(
        "research_belter",
        ModelConfig::new(
            "belter",
            "mistral-7b",
            format!("{}/research", server.uri()),
            &["research"],
        ),
    );
    registry.save_config().unwrap();

    let reloaded = ModelRegistry::new(Some(file)).unwrap();
    assert_eq!(reloaded.len(), 5);
    assert_eq!(reloaded.get_models_by_capability("research").len(), 2);

    let comm = ModelCommunicator::from_registry(&reloaded, &instant_config());
    let reply = comm
        .send_message("research_belter", &ModelMessage::new("meaning of life"))
        .await
        .unwrap();
    assert_eq!(reply["answer"], 42);
}

#[test]
fn toml_registry_file_is_supported() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("models.toml");
    std::fs::write(
        &file,
        r#"
[search_drummer]
type = "drummer"
base_model = "llama-3b"
endpoint = "http://localhost:6010/search"
capabilities = ["search"]
"#,
    )
    .unwrap();

    let registry = ModelRegistry::new(Some(file)).unwrap();
    assert_eq!(registry.len(), 1);
    let model = registry.get_model("search_drummer").unwrap();
    assert_eq!(model.model_type, "drummer");
    assert!(model.has_capability("search"));
}

// ---------------------------------------------------------------------------
// 6. Timeouts per model and per call
// ---------------------------------------------------------------------------

async fn slow_server(model: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{model}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "success"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn call_timeout_overrides_model_timeout() {
    let server = slow_server("amos").await;
    let config = CommunicatorConfig {
        max_retries: 1,
        ..instant_config()
    };
    let endpoints = HashMap::from([("amos".to_string(), format!("{}/amos", server.uri()))]);
    let comm = ModelCommunicator::new(endpoints, &config);

    let err = comm
        .send_message_with_timeout(
            "amos",
            &ModelMessage::new("status"),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HerdError::Communication(_)));

    let replies = comm
        .broadcast_message_with_timeout(
            &["amos".to_string()],
            &ModelMessage::new("status"),
            Some(Duration::from_millis(100)),
        )
        .await;
    assert!(replies.is_empty());
}

#[tokio::test]
async fn configured_model_timeout_applies_to_plain_sends() {
    let server = slow_server("naomi").await;
    let config = CommunicatorConfig {
        max_retries: 1,
        ..instant_config()
    };
    let endpoints = HashMap::from([("naomi".to_string(), format!("{}/naomi", server.uri()))]);
    let comm = ModelCommunicator::new(endpoints, &config);
    comm.set_timeout("naomi", Duration::from_millis(100)).unwrap();
    assert_eq!(
        comm.get_model_status("naomi").unwrap().timeout,
        Duration::from_millis(100)
    );

    let err = comm
        .send_message("naomi", &ModelMessage::new("status"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("naomi"));

    let reply = comm
        .send_message_with_timeout("naomi", &ModelMessage::new("status"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(reply["status"], "success");
}
