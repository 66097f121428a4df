//! REST API endpoints for the tether daemon.
//!
//! The API is the external command surface: a `start` persists the target
//! and kicks off a connection cycle, a `stop` tears the cycle down and
//! forgets the target so a reboot will not resurrect it. Everything else
//! is observation.
//!
//! All endpoints return structured JSON errors via [`AppError`]. Client
//! errors (bad request) return 4xx status codes; everything unexpected is
//! a 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use tether_types::{ConnectionState, ConnectionTarget, StatusEvent};

use crate::state::AppState;
use crate::store::{PersistedTarget, StoreError};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/events", get(get_events))
        // Cycle control
        .route("/api/start", post(start_cycle))
        .route("/api/stop", post(stop_cycle))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Current machine status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Current connection state.
    #[serde(flatten)]
    pub state: ConnectionState,
    /// Latest status line.
    pub message: String,
    /// When the latest status was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Target of the current cycle, if one is running.
    pub target: Option<PersistedTarget>,
}

/// Status endpoint.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let latest = state.supervisor.latest_status();
    let target = state.target.read().await;
    Json(StatusResponse {
        state: latest.state,
        message: latest.message,
        timestamp: latest.timestamp,
        target: target.as_ref().map(PersistedTarget::from),
    })
}

/// Query parameters for the events endpoint.
#[derive(Debug, Deserialize)]
struct EventsQuery {
    /// Maximum number of events to return.
    limit: Option<usize>,
}

/// Default number of events returned.
const DEFAULT_EVENTS_LIMIT: usize = 50;

/// Recent status events, newest first.
async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<StatusEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
    Json(state.recent_events(limit).await)
}

/// Request body for starting a cycle.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Device address or platform identifier.
    pub device_id: String,
    /// Service containing the notification characteristic.
    #[serde(default)]
    pub service_id: Option<Uuid>,
    /// Characteristic to subscribe to.
    #[serde(default)]
    pub characteristic_id: Option<Uuid>,
}

/// Start (or restart) a connection cycle.
///
/// The last start wins: a running cycle is stopped before the new one
/// begins, since the supervisor keeps its current link on a bare start
/// while running. The target is persisted before the cycle begins so a
/// crash or reboot resumes it. Returns 202: connecting happens
/// asynchronously and its outcome is reported on the status stream.
async fn start_cycle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, AppError> {
    let target = ConnectionTarget::from_parts(
        request.device_id,
        request.service_id,
        request.characteristic_id,
    )
    .map_err(|e| AppError::BadRequest(e.to_string()))?;

    state.store.lock().await.save(&target)?;
    *state.target.write().await = Some(target.clone());
    // Stop is a no-op from Idle, and the command queue keeps it ordered
    // ahead of the start that follows.
    state
        .supervisor
        .stop()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    state
        .supervisor
        .start(target)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Service started" })),
    ))
}

/// Stop the current cycle and clear the persisted target.
async fn stop_cycle(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state
        .supervisor
        .stop()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    state.store.lock().await.clear()?;
    *state.target.write().await = None;

    Ok(Json(serde_json::json!({ "message": "Service stopped" })))
}

/// API error responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Store(StoreError),
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use tether_core::mock::{MockHandle, MockLink};
    use tether_core::{ReconnectPolicy, link_channel, spawn};
    use tether_types::uuids::{NORDIC_UART_SERVICE, NORDIC_UART_TX};

    use crate::config::Config;
    use crate::store::TargetStore;

    fn create_test_state() -> (Arc<AppState>, MockHandle, tempfile::TempDir) {
        let (tx, rx) = link_channel();
        let (driver, mock) = MockLink::new(tx);
        let supervisor = spawn(Box::new(driver), rx, ReconnectPolicy::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = TargetStore::new(dir.path().join("target.json"));
        let state = AppState::new(supervisor, store, Config::default());
        (state, mock, dir)
    }

    async fn response_body(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn start_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/start")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body(response).await;
        assert!(body.contains("\"ok\""));
        assert!(body.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_status_starts_idle() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body(response).await;
        assert!(body.contains("\"idle\""));
        assert!(body.contains("\"target\":null"));
    }

    #[tokio::test]
    async fn test_start_accepts_and_persists_target() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(start_request(serde_json::json!({
                "device_id": "AA:BB:CC:DD:EE:FF",
                "service_id": NORDIC_UART_SERVICE,
                "characteristic_id": NORDIC_UART_TX,
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = response_body(response).await;
        assert!(body.contains("Service started"));

        let persisted = state.store.lock().await.load().unwrap();
        assert_eq!(persisted.address, "AA:BB:CC:DD:EE:FF");
        assert!(persisted.subscription.is_some());
    }

    #[tokio::test]
    async fn test_start_replaces_running_cycle() {
        let (state, mock, _dir) = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(start_request(serde_json::json!({
                "device_id": "AA:BB:CC:DD:EE:FF",
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.connect_count(), 1);

        let response = app
            .oneshot(start_request(serde_json::json!({
                "device_id": "11:22:33:44:55:66",
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The second start tore the first cycle down and connected anew.
        assert_eq!(mock.connect_count(), 2);
        let persisted = state.store.lock().await.load().unwrap();
        assert_eq!(persisted.address, "11:22:33:44:55:66");
    }

    #[tokio::test]
    async fn test_start_rejects_one_sided_id_pair() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(start_request(serde_json::json!({
                "device_id": "AA:BB:CC:DD:EE:FF",
                "service_id": NORDIC_UART_SERVICE,
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Nothing was persisted and no cycle started.
        assert!(state.store.lock().await.load().is_none());
        assert_eq!(state.supervisor.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_device_id() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(start_request(serde_json::json!({ "device_id": "  " })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_clears_persisted_target() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(start_request(serde_json::json!({
                "device_id": "AA:BB:CC:DD:EE:FF",
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response_body(response).await.contains("Service stopped"));
        assert!(state.store.lock().await.load().is_none());
        assert!(state.target.read().await.is_none());
    }

    #[tokio::test]
    async fn test_events_endpoint_returns_recent_events() {
        let (state, _mock, _dir) = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(start_request(serde_json::json!({
                "device_id": "AA:BB:CC:DD:EE:FF",
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // Give the supervisor and collector a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/events?limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body(response).await;
        assert!(body.contains("Connecting to AA:BB:CC:DD:EE:FF"));
    }
}
