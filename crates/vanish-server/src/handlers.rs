//! HTTP handlers for the Vanish server.
//!
//! Every route is a thin adapter over [`Broker`]: extract, call, map the
//! result to JSON and a status code.

use crate::config::Config;
use crate::metrics;
use crate::socket;
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use vanish_core::{Broker, BrokerError, NoopSink, NotificationSink, TracingSink};
use vanish_protocol::{
    CreateRoomRequest, ErrorKind, ErrorResponse, JoinRoomRequest, PollQuery, PollResponse,
    RoomResponse, SendMessageRequest, SendResponse,
};

/// Shared server state.
pub struct AppState {
    /// The room and message broker.
    pub broker: Broker,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let sink: Arc<dyn NotificationSink> = if config.notifications.log {
            Arc::new(TracingSink)
        } else {
            Arc::new(NoopSink)
        };

        Self {
            broker: Broker::with_sink(config.broker_config(), sink),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => {
                metrics::spawn_stats_reporter(
                    state.broker.clone(),
                    Duration::from_millis(config.metrics.stats_interval_ms.max(1)),
                );
            }
            Err(e) => error!("Failed to start metrics server: {:#}", e),
        }
    }

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Vanish server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors.allowed_origins);

    Router::new()
        .route("/api/rooms/create", post(create_room_handler))
        .route("/api/rooms/join", post(join_room_handler))
        .route("/api/rooms/:room_code/messages", get(poll_handler))
        .route("/api/messages/send", post(send_message_handler))
        .route("/health", get(health_handler))
        .route(&state.config.websocket_path, get(socket::ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

/// A broker error on its way to the client.
#[derive(Debug)]
pub struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(BrokerError::InvalidInput(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(BrokerError::InvalidInput(rejection.body_text()))
    }
}

/// HTTP status for an error kind.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists | ErrorKind::Full => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        metrics::record_error(kind);
        debug!(error = %self.0, "Request rejected");

        let body = ErrorResponse::new(kind, self.0.to_string());
        (status_for(kind), Json(body)).into_response()
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<Json<RoomResponse>, ApiError> {
    let Json(request) = payload?;
    let room = state.broker.create_room(request)?;
    metrics::record_room_created();
    Ok(Json(RoomResponse::ok(room)))
}

async fn join_room_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<JoinRoomRequest>, JsonRejection>,
) -> Result<Json<RoomResponse>, ApiError> {
    let Json(request) = payload?;
    let room = state.broker.join_room(request)?;
    Ok(Json(RoomResponse::ok(room)))
}

async fn poll_handler(
    State(state): State<Arc<AppState>>,
    Path(room_code): Path<String>,
    query: Result<Query<PollQuery>, QueryRejection>,
) -> Result<Json<PollResponse>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.broker.poll(&room_code, query)?))
}

async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(request) = payload?;
    let message_id = state.broker.send_message(request)?;
    metrics::record_message("http");
    Ok(Json(SendResponse {
        success: true,
        message_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        app(Arc::new(AppState::new(Config::default())))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&test_app(), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_room_flow() {
        let app = test_app();

        let (status, body) = call(
            &app,
            post_json("/api/rooms/create", json!({"roomCode": "ab12cd34", "creatorId": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["room"]["code"], "AB12CD34");
        assert_eq!(body["room"]["userCount"], 1);

        let (status, body) = call(
            &app,
            post_json("/api/rooms/join", json!({"roomCode": "AB12CD34", "userId": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["room"]["userCount"], 2);

        let (status, body) = call(
            &app,
            post_json(
                "/api/messages/send",
                json!({
                    "id": "1700000000000",
                    "text": "hello",
                    "senderId": 1,
                    "roomCode": "AB12CD34",
                    "timestamp": 1_700_000_000_000u64
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "messageId": "1700000000000"}));

        let (status, body) = call(&app, get_request("/api/rooms/AB12CD34/messages?userId=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["text"], "hello");
        assert_eq!(body["messages"][0]["expiresAt"], 1_700_000_015_000u64);
        assert_eq!(body["userCount"], 2);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = test_app();
        call(
            &app,
            post_json("/api/rooms/create", json!({"roomCode": "R1", "creatorId": "1"})),
        )
        .await;
        call(
            &app,
            post_json("/api/rooms/join", json!({"roomCode": "R1", "userId": "2"})),
        )
        .await;

        let (status, body) = call(
            &app,
            post_json("/api/rooms/join", json!({"roomCode": "R1", "userId": "3"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "full");

        let (status, body) = call(&app, get_request("/api/rooms/R1/messages?userId=3")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = call(&app, get_request("/api/rooms/NOPE/messages?userId=1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, get_request("/api/rooms/R1/messages")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_input() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/messages/send")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = call(&test_app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
    }
}
