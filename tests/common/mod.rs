//! Shared helpers: an in-process ActionKit API stub and gateway launchers

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mcp_actionkit::config::Config;
use mcp_actionkit::gateway::Gateway;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PRIVATE_KEY: &str = include_str!("../fixtures/test_signing_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/test_signing_key.pub.pem");
pub const PROJECT_ID: &str = "proj-test";

/// Request seen by the stub
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub project: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl Recorded {
    /// Bearer token from the `Authorization` header
    pub fn bearer(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
    }
}

/// Canned responses served by the stub
#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub catalog_status: u16,
    pub catalog_body: Value,
    pub invoke_status: u16,
    pub invoke_body: Value,
    pub delay: Duration,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            catalog_status: 200,
            catalog_body: slack_catalog(),
            invoke_status: 200,
            invoke_body: json!({"ok": true, "ts": "1712345678.000100"}),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
struct StubState {
    behavior: StubBehavior,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Handle for a running stub; shuts the server down on drop
pub struct ActionKitStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ActionKitStub {
    pub async fn spawn() -> Self {
        Self::spawn_with(StubBehavior::default()).await
    }

    pub async fn spawn_with(behavior: StubBehavior) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            behavior,
            requests: Arc::clone(&requests),
        };
        let app = Router::new()
            .route(
                "/projects/{project}/actions",
                get(catalog_handler).post(invoke_handler),
            )
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            shutdown: Some(tx),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with_method(&self, method: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

impl Drop for ActionKitStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn record(state: &StubState, method: &str, project: String, query: Option<String>, headers: &HeaderMap, body: Option<Value>) {
    state.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        project,
        query,
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body,
    });
}

fn respond(status: u16, body: &Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    match body {
        Value::String(text) => (status, text.clone()).into_response(),
        other => (status, Json(other.clone())).into_response(),
    }
}

async fn catalog_handler(
    State(state): State<StubState>,
    Path(project): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    record(&state, "GET", project, query, &headers, None);
    tokio::time::sleep(state.behavior.delay).await;
    respond(state.behavior.catalog_status, &state.behavior.catalog_body)
}

async fn invoke_handler(
    State(state): State<StubState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = serde_json::from_slice(&body).ok();
    record(&state, "POST", project, None, &headers, body);
    tokio::time::sleep(state.behavior.delay).await;
    respond(state.behavior.invoke_status, &state.behavior.invoke_body)
}

/// `{slack: [SLACK_SEND_MESSAGE, SLACK_LIST_CHANNELS]}`
pub fn slack_catalog() -> Value {
    json!({
        "actions": {
            "slack": [
                {"type": "function", "function": {
                    "name": "SLACK_SEND_MESSAGE",
                    "description": "Send a message to a Slack channel",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "channel": {"type": "string"},
                            "text": {"type": "string"}
                        },
                        "required": ["channel", "text"]
                    }
                }},
                {"type": "function", "function": {
                    "name": "SLACK_LIST_CHANNELS",
                    "description": "List Slack channels",
                    "parameters": {"type": "object", "properties": {}}
                }}
            ]
        }
    })
}

/// Configuration pointing at `base_url` with the test key
pub fn config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.env_files.clear();
    config.actionkit.base_url = base_url.to_string();
    config.actionkit.project_id = Some(PROJECT_ID.to_string());
    config.actionkit.signing_key = Some(PRIVATE_KEY.to_string());
    config.actionkit.auth_url = "https://connect.example.com/auth".to_string();
    config
}

/// Running HTTP gateway; stops on drop
pub struct GatewayHandle {
    pub mcp_url: String,
    pub health_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_gateway(config: Config) -> GatewayHandle {
    let gateway = Gateway::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        gateway
            .serve_http(listener, async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    GatewayHandle {
        mcp_url: format!("http://{addr}/mcp"),
        health_url: format!("http://{addr}/health"),
        shutdown: Some(tx),
    }
}

/// Parse the single JSON text item of a tool call result
pub fn envelope(result: &Value) -> (Value, bool) {
    let text = result["content"][0]["text"].as_str().unwrap();
    (
        serde_json::from_str(text).unwrap(),
        result["isError"].as_bool().unwrap(),
    )
}
