use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use retry_config::{HandlersConfig, HttpCalloutConfig};
use retry_domain::ExecutionRecord;
use retry_worker::handlers::HTTP_CALLOUT_HANDLER;
use retry_worker::{register_builtin_handlers, HandlerRegistry, RetryInit};

type Received = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

/// 记录ID为 "bad" 时返回503，其余返回200
async fn callout(
    State(received): State<Received>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    let status = if body["record_id"] == "bad" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    received.lock().unwrap().push((headers, body));
    (status, "ok")
}

async fn spawn_callout_server() -> (String, Received) {
    let received = Received::default();
    let app = Router::new()
        .route("/callout", post(callout))
        .with_state(received.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let address = format!("http://{}/callout", listener.local_addr().unwrap());

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Failed to start test server");
    });

    (address, received)
}

#[tokio::test]
async fn test_http_callout_reports_status_per_record() {
    let (endpoint, received) = spawn_callout_server().await;
    let config = HandlersConfig {
        http_callout: Some(HttpCalloutConfig {
            endpoint,
            timeout_seconds: 5,
            headers: HashMap::from([("x-integration".to_string(), "erp".to_string())]),
        }),
    };

    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry, &config).unwrap();

    let mut parent = ExecutionRecord::new(4, vec!["good".into(), "bad".into()]);
    parent.id = 12;
    parent.record_attempt();
    let init = RetryInit::new(parent.spawn_retry_child(), parent);

    let mut worker = registry.create_retry(HTTP_CALLOUT_HANDLER, init).unwrap();
    let report = worker.run().await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes[0].success);
    assert_eq!(report.outcomes[0].status_code, Some(200));
    assert_eq!(report.outcomes[0].response.as_deref(), Some("ok"));
    assert!(!report.outcomes[1].success);
    assert_eq!(report.failed_record_ids(), vec!["bad"]);
    assert_eq!(report.last_failure_status(), Some(503));

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    for (headers, body) in received.iter() {
        assert_eq!(
            headers.get("x-integration").and_then(|v| v.to_str().ok()),
            Some("erp")
        );
        assert_eq!(body["retry_from"], 12);
        assert_eq!(body["policy_id"], 4);
    }
}

#[tokio::test]
async fn test_without_http_config_no_handler_is_registered() {
    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry, &HandlersConfig::default()).unwrap();
    assert!(registry.is_empty());
}
