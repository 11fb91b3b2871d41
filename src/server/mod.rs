//! HTTP/WebSocket transport
//!
//! - `POST /execute` runs a job on its own task and returns its result
//! - `GET /ws` attaches an observer to the hub
//! - `GET /health` reports liveness and the observer count

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::{ExecutionRequest, ExecutionResult, StreamEvent};
use crate::hub::Hub;
use crate::orchestrator::Orchestrator;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub hub: Arc<Hub>,
}

/// Error response: `{"detail": ..., "category": ...}`
pub struct AppError(crate::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_timeout() {
            StatusCode::REQUEST_TIMEOUT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = Json(serde_json::json!({
            "detail": self.0.to_string(),
            "category": self.0.category(),
        }));
        (status, body).into_response()
    }
}

impl From<crate::Error> for AppError {
    fn from(err: crate::Error) -> Self {
        AppError(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub message: String,
}

/// Build the application router
pub fn build_router(state: AppState, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/execute", post(execute))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResult>, AppError> {
    // a client that disconnects drops this future, never the job
    let result = state
        .orchestrator
        .submit(request)
        .await
        .map_err(crate::Error::from)??;
    Ok(Json(result))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        connections: state.hub.observer_count().await,
        message: "Code Dock execution server running".to_string(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state.hub))
}

/// Serve one observer until either side goes away
async fn observe(socket: WebSocket, hub: Arc<Hub>) {
    let (id, mut feed) = hub.attach().await;
    let (mut outgoing, mut incoming) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);

    let mut writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = feed.recv() => match event {
                    Some(event) => match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    },
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
            };
            if outgoing.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = outgoing.close().await;
    });

    let relay_hub = hub.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                Message::Text(text) => match interpret(text.as_str()) {
                    ObserverAction::Relay(data) => {
                        relay_hub
                            .broadcast(StreamEvent::position_confirmed(data))
                            .await;
                    }
                    ObserverAction::Reply(reply) => {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    hub.detach(id).await;
}

/// What to do with a text frame from an observer
#[derive(Debug, PartialEq)]
enum ObserverAction {
    /// Re-broadcast to every observer
    Relay(serde_json::Value),
    /// Answer the sender only
    Reply(String),
}

fn interpret(text: &str) -> ObserverAction {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.get("type").and_then(|t| t.as_str()) == Some("joint_position_confirmed") => {
            let data = value
                .get("data")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            tracing::debug!("Relaying position confirmation");
            ObserverAction::Relay(data)
        }
        Ok(_) => ObserverAction::Reply(format!("Server received: {}", text)),
        Err(_) => ObserverAction::Reply(format!("Server received (non-JSON): {}", text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sandbox::sh_config;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(root: &std::path::Path, tweak: impl FnOnce(&mut Config)) -> (Router, Arc<Hub>) {
        let mut config = Config {
            sandbox: sh_config(root),
            ..Config::default()
        };
        tweak(&mut config);
        let hub = Arc::new(Hub::new(64));
        let orchestrator = Orchestrator::new(&config, hub.clone()).unwrap();
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            hub: hub.clone(),
        };
        (build_router(state, true), hub)
    }

    async fn post_execute(router: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_execute_returns_result_and_feeds_observers() {
        let root = tempfile::tempdir().unwrap();
        let (router, hub) = app(root.path(), |_| {});
        let (_, mut feed) = hub.attach().await;

        let (status, json) = post_execute(
            router,
            serde_json::json!({"code": "echo hi\nexit 4", "stdin": ""}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exit_code"], 4);
        assert_eq!(json["stdout"], "hi");
        assert!(json.get("tests").is_none());

        let mut kinds = Vec::new();
        while let Ok(event) = feed.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.first(), Some(&crate::core::EventKind::ExecutionStart));
        assert_eq!(kinds.last(), Some(&crate::core::EventKind::ExecutionComplete));
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_abandon_job() {
        let root = tempfile::tempdir().unwrap();
        let (router, hub) = app(root.path(), |_| {});
        let (_, mut feed) = hub.attach().await;

        let request = Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"code": "echo hi\nsleep 1\necho bye"}).to_string(),
            ))
            .unwrap();
        // the client gives up long before the job ends
        let gave_up = tokio::time::timeout(Duration::from_millis(300), router.oneshot(request)).await;
        assert!(gave_up.is_err());

        let mut kinds = Vec::new();
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = feed.recv().await {
                kinds.push(event.kind);
                if event.kind == crate::core::EventKind::ExecutionComplete {
                    break;
                }
            }
        })
        .await;

        assert!(drained.is_ok());
        assert_eq!(kinds.last(), Some(&crate::core::EventKind::ExecutionComplete));
        let stdout = kinds
            .iter()
            .filter(|k| **k == crate::core::EventKind::Stdout)
            .count();
        assert_eq!(stdout, 2);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_policy_violation_is_400() {
        let root = tempfile::tempdir().unwrap();
        let (router, _) = app(root.path(), |_| {});
        let (status, json) =
            post_execute(router, serde_json::json!({"code": "import socket"})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["category"], "policy_violation");
        assert!(json["detail"].as_str().unwrap().contains("import socket"));
    }

    #[tokio::test]
    async fn test_timeout_is_408() {
        let root = tempfile::tempdir().unwrap();
        let (router, _) = app(root.path(), |config| {
            config.execution.guest_timeout = Duration::from_millis(400);
            config.execution.pump_wall_clock = Duration::from_millis(300);
        });
        let (status, json) = post_execute(router, serde_json::json!({"code": "sleep 30"})).await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(json["category"], "timeout");
    }

    #[tokio::test]
    async fn test_health_reports_connections() {
        let root = tempfile::tempdir().unwrap();
        let (router, hub) = app(root.path(), |_| {});
        let (_id, _feed) = hub.attach().await;

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.connections, 1);
    }

    #[test]
    fn test_observer_messages() {
        assert_eq!(
            interpret(r#"{"type": "joint_position_confirmed", "data": {"elbow": 1.0}}"#),
            ObserverAction::Relay(serde_json::json!({"elbow": 1.0}))
        );
        assert_eq!(
            interpret(r#"{"type": "joint_position_confirmed"}"#),
            ObserverAction::Relay(serde_json::json!({}))
        );
        assert_eq!(
            interpret(r#"{"type": "ping"}"#),
            ObserverAction::Reply(r#"Server received: {"type": "ping"}"#.to_string())
        );
        assert_eq!(
            interpret("hello"),
            ObserverAction::Reply("Server received (non-JSON): hello".to_string())
        );
    }
}
