//! Axum-based HTTP server for the switch-machine API.
//!
//! Provides REST endpoints for:
//! - GET `/api/switchmachines` - Every attached switch machine
//! - GET `/api/switchmachines/:id` - One switch machine
//! - PUT `/api/switchmachines` - Batch of update requests
//! - POST `/api/switchmachines/mockrxdata` - Inject a full hex receive frame
//!   and poll once (only when a mock bus is attached)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::bus::TortoiseBusDriver;
use crate::config::WebConfig;
use crate::hal::MockTransport;
use crate::traits::Driver;
use crate::{ControllerError, SwitchMachineId, SwitchMachineUpdateRequest, TortoiseController};

use super::api::{
    parse_hex_frame, ApiResponse, MockRxResponse, SwitchMachineResponse, UpdateResult,
};

// ============================================================================
// Shared State
// ============================================================================

/// Injects one receive frame into a simulated bus and polls it.
pub type MockRxHook = Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

struct MockRx {
    hook: MockRxHook,
    frame_len: usize,
}

/// State shared by every route handler
pub struct ApiState<D: Driver + 'static> {
    controller: TortoiseController<D>,
    mock_rx: Option<Arc<MockRx>>,
}

impl<D: Driver + 'static> ApiState<D> {
    /// Serve `controller`
    pub fn new(controller: TortoiseController<D>) -> Self {
        Self {
            controller,
            mock_rx: None,
        }
    }

    /// Enable the mock receive route with a custom hook.
    ///
    /// Posted frames must be exactly `frame_len` bytes.
    pub fn with_mock_rx(mut self, frame_len: usize, hook: MockRxHook) -> Self {
        self.mock_rx = Some(Arc::new(MockRx { hook, frame_len }));
        self
    }

    /// The served controller
    pub fn controller(&self) -> &TortoiseController<D> {
        &self.controller
    }
}

impl ApiState<TortoiseBusDriver<MockTransport>> {
    /// Enable the mock receive route against `bus`.
    ///
    /// Each posted frame replaces what the bus reports and runs one poll.
    pub fn with_mock_bus(self, bus: MockTransport) -> Self {
        let controller = self.controller.clone();
        let frame_len = controller.driver().config().rx_len();
        self.with_mock_rx(frame_len, Arc::new(move |frame: &[u8]| {
            bus.set_rx(frame);
            controller.driver().poll_now().map_err(|err| err.to_string())
        }))
    }
}

fn error_status(err: &ControllerError) -> StatusCode {
    if err.is_not_exist() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /api/switchmachines - Every attached switch machine
async fn list_switch_machines<D: Driver + 'static>(
    State(state): State<Arc<ApiState<D>>>,
) -> Json<ApiResponse<Vec<SwitchMachineResponse>>> {
    let machines = state
        .controller
        .get_switch_machines()
        .iter()
        .map(SwitchMachineResponse::from)
        .collect();
    Json(ApiResponse::ok(machines))
}

/// GET /api/switchmachines/:id - One switch machine
async fn get_switch_machine<D: Driver + 'static>(
    State(state): State<Arc<ApiState<D>>>,
    Path(raw_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<SwitchMachineResponse>>) {
    let Ok(id) = raw_id.trim().parse::<u16>().map(SwitchMachineId::new) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("Malformed id in request")),
        );
    };

    match state.controller.get_switch_machine_by_id(id) {
        Ok(machine) => (
            StatusCode::OK,
            Json(ApiResponse::ok(SwitchMachineResponse::from(&machine))),
        ),
        Err(err) => (error_status(&err), Json(ApiResponse::err(err.to_string()))),
    }
}

/// PUT /api/switchmachines - Apply a batch of updates
///
/// Accepts JSON: `[{"id": 0, "position": "position1", "gpio0": "on"}]`
/// with every field but `id` optional. Items are applied in order; failures
/// are reported per item without stopping the batch.
async fn update_switch_machines<D: Driver + 'static>(
    State(state): State<Arc<ApiState<D>>>,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse<Vec<UpdateResult>>>) {
    let requests: Vec<SwitchMachineUpdateRequest> = match serde_json::from_slice(&body) {
        Ok(requests) => requests,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err(format!("Invalid update request: {err}"))),
            );
        }
    };

    // Driver updates block until the bus loop has written them
    let controller = state.controller.clone();
    let applied = tokio::task::spawn_blocking(move || {
        requests
            .into_iter()
            .map(|request| match controller.update_switch_machine(request) {
                Ok(()) => (StatusCode::OK, UpdateResult::applied(request.id)),
                Err(err) => (
                    error_status(&err),
                    UpdateResult::failed(request.id, err.to_string()),
                ),
            })
            .collect::<Vec<_>>()
    })
    .await;

    let applied = match applied {
        Ok(applied) => applied,
        Err(err) => {
            warn!(%err, "update task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("Update task failed")),
            );
        }
    };

    let failed = applied.iter().filter(|(_, r)| !r.success).count();
    let status = match failed {
        0 => StatusCode::OK,
        // A single failure keeps its own status; mixed batches are a bad request
        _ if applied.len() == 1 => applied[0].0,
        _ => StatusCode::BAD_REQUEST,
    };
    let results: Vec<UpdateResult> = applied.into_iter().map(|(_, r)| r).collect();

    if failed == 0 {
        (status, Json(ApiResponse::ok(results)))
    } else {
        let message = format!("{failed} of {} updates failed", results.len());
        (status, Json(ApiResponse::partial(results, message)))
    }
}

/// POST /api/switchmachines/mockrxdata - Inject a receive frame
///
/// Accepts a hex string body such as `3000` covering the whole receive
/// buffer, one byte per board. The first byte belongs to the highest board
/// and the last byte to board 0.
async fn post_mock_rx_data<D: Driver + 'static>(
    State(state): State<Arc<ApiState<D>>>,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse<MockRxResponse>>) {
    let Some(mock_rx) = state.mock_rx.clone() else {
        return (StatusCode::NOT_FOUND, Json(ApiResponse::err("Not found")));
    };

    let text = String::from_utf8_lossy(&body);
    let frame = match parse_hex_frame(&text) {
        Ok(frame) => frame,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err(err.to_string())),
            );
        }
    };
    if frame.len() != mock_rx.frame_len {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err(format!(
                "Mock rx frame must be {} bytes, got {}",
                mock_rx.frame_len,
                frame.len()
            ))),
        );
    }
    debug!(frame = ?frame, "injecting mock rx frame");

    let bytes = frame.len();
    match tokio::task::spawn_blocking(move || (mock_rx.hook)(&frame)).await {
        Ok(Ok(())) => (StatusCode::OK, Json(ApiResponse::ok(MockRxResponse { bytes }))),
        Ok(Err(message)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::err(message)),
        ),
        Err(err) => {
            warn!(%err, "mock rx task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("Mock rx task failed")),
            )
        }
    }
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::err("Not found")),
    )
}

// ============================================================================
// Server Builder
// ============================================================================

/// Configuration for the web server
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::from_config(&WebConfig::default())
    }
}

impl WebServerConfig {
    /// Create a new config with the given address
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set whether CORS should be permissive
    pub fn cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Create from shared WebConfig
    pub fn from_config(config: &WebConfig) -> Self {
        Self {
            addr: ([0, 0, 0, 0], config.port).into(),
            cors_permissive: config.cors_permissive,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router<D: Driver + 'static>(
    state: Arc<ApiState<D>>,
    config: &WebServerConfig,
) -> Router {
    let mut router = Router::new()
        .route(
            "/api/switchmachines",
            get(list_switch_machines::<D>).put(update_switch_machines::<D>),
        )
        .route(
            "/api/switchmachines/mockrxdata",
            post(post_mock_rx_data::<D>),
        )
        .route("/api/switchmachines/:id", get(get_switch_machine::<D>))
        .fallback(not_found)
        .with_state(state);

    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Start the web server
///
/// This function blocks until the server is shut down.
pub async fn run_server<D: Driver + 'static>(
    state: Arc<ApiState<D>>,
    config: WebServerConfig,
) -> Result<(), std::io::Error> {
    let router = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "web server listening");

    axum::serve(listener, router).await
}
