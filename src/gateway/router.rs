//! Streamable HTTP transport
//!
//! `POST /mcp` carries JSON-RPC messages. The first `initialize` without an
//! `mcp-session-id` header opens a session; every later request names it.
//! `DELETE /mcp` tears a session down; sessions nobody names for the idle
//! timeout are reaped in the background. `GET /health` reports liveness.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handler::{self, TOOLS_LIST_CHANGED};
use super::session::{AuthGate, Session};
use crate::error::rpc_codes;
use crate::protocol::{JsonRpcNotification, JsonRpcResponse};

/// Header carrying the session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Live session plus the last time a request named it
pub struct SessionEntry {
    session: Arc<Session>,
    // Milliseconds since `AppState::started`
    last_seen: AtomicU64,
}

impl SessionEntry {
    /// The session itself
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

/// Shared application state
pub struct AppState {
    /// Gate shared by every session
    pub gate: Arc<AuthGate>,
    /// Live sessions by id
    pub sessions: DashMap<String, SessionEntry>,
    /// Sessions beyond this count are refused until idle ones are evicted
    pub max_sessions: usize,
    started: Instant,
}

impl AppState {
    /// Create state with no sessions
    #[must_use]
    pub fn new(gate: Arc<AuthGate>, max_sessions: usize) -> Self {
        Self {
            gate,
            sessions: DashMap::new(),
            max_sessions,
            started: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Open and register a new session
    pub async fn open_session(&self) -> Arc<Session> {
        let id = format!("gw-{}", Uuid::new_v4());
        let session = Arc::new(Session::start(id.clone(), Arc::clone(&self.gate)).await);
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                session: Arc::clone(&session),
                last_seen: AtomicU64::new(self.now_millis()),
            },
        );
        info!(session_id = %id, sessions = self.sessions.len(), "Session opened");
        session
    }

    /// Look up a session and mark it as used
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| {
            entry.last_seen.store(self.now_millis(), Ordering::Relaxed);
            Arc::clone(&entry.session)
        })
    }

    /// Whether another session may be opened
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.sessions.len() < self.max_sessions
    }

    /// Drop sessions idle for longer than `idle_timeout`; returns how many went
    pub fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let now = self.now_millis();
        let limit = u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let before = self.sessions.len();
        self.sessions.retain(|id, entry| {
            let idle = now.saturating_sub(entry.last_seen.load(Ordering::Relaxed));
            let keep = idle <= limit;
            if !keep {
                info!(session_id = %id, idle_ms = idle, "Session evicted after idling");
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }
}

/// Spawn a background task that evicts idle sessions every `interval`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_session_reaper(
    state: Arc<AppState>,
    interval: Duration,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = state.evict_idle(idle_timeout);
            if evicted > 0 {
                debug!(count = evicted, sessions = state.sessions.len(), "Reaped idle sessions");
            }
        }
    })
}

/// Create the router
pub fn create_router(state: Arc<AppState>, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(mcp_post_handler).delete(mcp_delete_handler))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len()
    }))
}

/// POST /mcp handler
async fn mcp_post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable request body");
            return rpc_error(
                StatusCode::BAD_REQUEST,
                rpc_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            );
        }
    };

    let requested = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let is_initialize = value.get("method").and_then(Value::as_str) == Some("initialize");

    let session = match requested {
        Some(id) => {
            let Some(session) = state.session(&id) else {
                debug!(session_id = %id, "Unknown session");
                return rpc_error(
                    StatusCode::NOT_FOUND,
                    rpc_codes::INVALID_REQUEST,
                    "Session not found",
                );
            };
            session
        }
        None if is_initialize => {
            if !state.has_capacity() {
                warn!(sessions = state.sessions.len(), "Session limit reached");
                return rpc_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    rpc_codes::SERVER_ERROR_START,
                    "Too many active sessions; retry later",
                );
            }
            state.open_session().await
        }
        None => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                rpc_codes::INVALID_REQUEST,
                format!("Missing {SESSION_HEADER} header; send initialize first"),
            );
        }
    };

    let dispatch = handler::handle_value(&session, &value).await;
    let Some(response) = dispatch.response else {
        return with_session(StatusCode::ACCEPTED.into_response(), session.id());
    };

    // Without a standing stream the list change rides along on this response.
    if dispatch.tools_changed && accepts_event_stream(&headers) {
        return with_session(sse_response(&response), session.id());
    }
    if dispatch.tools_changed {
        debug!(session_id = %session.id(), "Tool list changed; client did not accept SSE");
    }

    with_session(Json(response).into_response(), session.id())
}

/// DELETE /mcp handler - session termination
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());

    match session_id {
        Some(id) if state.sessions.remove(id).is_some() => {
            info!(session_id = %id, "Session terminated by client");
            StatusCode::NO_CONTENT
        }
        Some(id) => {
            debug!(session_id = %id, "Session not found for DELETE");
            StatusCode::NOT_FOUND
        }
        None => StatusCode::BAD_REQUEST,
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Single-shot SSE body: the response, then the list change notification
fn sse_response(response: &JsonRpcResponse) -> Response {
    let notification = JsonRpcNotification::new(TOOLS_LIST_CHANGED);
    let events = [
        serde_json::to_string(response),
        serde_json::to_string(&notification),
    ];

    let mut body = String::new();
    for event in events {
        match event {
            Ok(data) => {
                body.push_str("event: message\ndata: ");
                body.push_str(&data);
                body.push_str("\n\n");
            }
            Err(e) => warn!(error = %e, "Failed to serialize SSE event"),
        }
    }

    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))],
        body,
    )
        .into_response()
}

fn rpc_error(status: StatusCode, code: i32, message: impl Into<String>) -> Response {
    (status, Json(JsonRpcResponse::error(None, code, message))).into_response()
}

fn with_session(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actionkit::{ActionCatalog, ActionProvider};
    use crate::config::ActionKitConfig;
    use crate::signer::{SignedAssertion, TokenSigner};
    use async_trait::async_trait;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/test_signing_key.pem");

    struct EmptyProvider;

    #[async_trait]
    impl ActionProvider for EmptyProvider {
        async fn fetch_actions(&self, _assertion: &SignedAssertion) -> crate::Result<ActionCatalog> {
            Ok(ActionCatalog::new(Vec::new()))
        }

        async fn invoke(
            &self,
            _action: &str,
            _parameters: Value,
            _assertion: &SignedAssertion,
        ) -> crate::Result<Value> {
            Ok(Value::Null)
        }
    }

    fn state(max_sessions: usize) -> AppState {
        let config = ActionKitConfig {
            project_id: Some("proj-1".to_string()),
            ..ActionKitConfig::default()
        };
        let signer = Arc::new(TokenSigner::from_pem(PRIVATE_KEY).unwrap());
        let gate = AuthGate::new(signer, Arc::new(EmptyProvider), &config).unwrap();
        AppState::new(Arc::new(gate), max_sessions)
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_active_ones_kept() {
        let state = state(8);
        let active = state.open_session().await.id().to_string();
        let idle = state.open_session().await.id().to_string();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.session(&active).is_some());

        assert_eq!(state.evict_idle(Duration::from_millis(25)), 1);
        assert!(state.sessions.contains_key(&active));
        assert!(!state.sessions.contains_key(&idle));

        assert_eq!(state.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn capacity_tracks_live_sessions() {
        let state = state(1);
        assert!(state.has_capacity());
        let id = state.open_session().await.id().to_string();
        assert!(!state.has_capacity());

        state.sessions.remove(&id);
        assert!(state.has_capacity());
    }

    #[tokio::test]
    async fn reaper_sweeps_in_background() {
        let state = Arc::new(state(8));
        state.open_session().await;

        let reaper = spawn_session_reaper(
            Arc::clone(&state),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        reaper.abort();
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn event_stream_detection() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_event_stream(&headers));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        assert!(accepts_event_stream(&headers));
    }

    #[test]
    fn session_header_is_attached() {
        let response = with_session(StatusCode::OK.into_response(), "gw-1");
        assert_eq!(response.headers()[SESSION_HEADER], "gw-1");
    }

    #[tokio::test]
    async fn sse_body_carries_response_then_notification() {
        let response = JsonRpcResponse::success(crate::protocol::RequestId::Number(1), json!({}));
        let sse = sse_response(&response);
        assert_eq!(sse.headers()[header::CONTENT_TYPE], "text/event-stream");

        let bytes = axum::body::to_bytes(sse.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let events: Vec<&str> = text
            .split("\n\n")
            .filter(|e| !e.is_empty())
            .collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("\"id\":1"));
        assert!(events[1].contains(TOOLS_LIST_CHANGED));
    }
}
