//! Integration tests for the web API.
//!
//! These tests drive the router against a real bus loop over a mock bus,
//! injecting receive frames through the mock rx route.

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use rs_tortoise::config::{BusConfig, ControllerConfig};
use rs_tortoise::hal::MockTransport;
use rs_tortoise::services::{
    build_router, ApiResponse, ApiState, MockRxResponse, SwitchMachineResponse, UpdateResult,
    WebServerConfig,
};
use rs_tortoise::{GpioState, MotorState, Position, TortoiseBusDriver, TortoiseController};

type BusController = TortoiseController<TortoiseBusDriver<MockTransport>>;

fn create_controller(bus: &MockTransport) -> BusController {
    // Polls only happen through the mock rx route
    let bus_config = BusConfig::default()
        .with_boards(1)
        .with_poll_interval_ms(60_000);
    let driver = TortoiseBusDriver::new(bus.clone(), bus_config).unwrap();
    TortoiseController::new(driver, ControllerConfig::default()).unwrap()
}

fn create_test_app() -> (axum::Router, MockTransport) {
    let bus = MockTransport::new(1);
    let controller = create_controller(&bus);
    let state = Arc::new(ApiState::new(controller).with_mock_bus(bus.clone()));
    let router = build_router(state, &WebServerConfig::default());
    (router, bus)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_owned()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ============================================================================
// Query Tests
// ============================================================================

#[tokio::test]
async fn test_list_empty() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "GET", "/api/switchmachines", "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json: ApiResponse<Vec<SwitchMachineResponse>> = json(response).await;
    assert!(json.success);
    assert_eq!(json.data, Some(vec![]));
}

#[tokio::test]
async fn test_mock_rx_attaches_switch_machine() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "POST", "/api/switchmachines/mockrxdata", "30").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json_rx: ApiResponse<MockRxResponse> = json(response).await;
    assert_eq!(json_rx.data, Some(MockRxResponse { bytes: 1 }));

    let response = send(&app, "GET", "/api/switchmachines", "").await;
    let json: ApiResponse<Vec<SwitchMachineResponse>> = json(response).await;
    let machines = json.data.unwrap();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].id.get(), 0);
    assert_eq!(machines[0].position, Position::Unknown);
    assert_eq!(machines[0].motor_state, MotorState::Idle);
}

#[tokio::test]
async fn test_get_by_id() {
    let (app, _bus) = create_test_app();
    send(&app, "POST", "/api/switchmachines/mockrxdata", "c0").await;

    let response = send(&app, "GET", "/api/switchmachines/3", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: ApiResponse<SwitchMachineResponse> = json(response).await;
    assert_eq!(json.data.unwrap().position, Position::Unknown);
}

#[tokio::test]
async fn test_get_missing_id_is_not_found() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "GET", "/api/switchmachines/2", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: ApiResponse<SwitchMachineResponse> = json(response).await;
    assert!(!json.success);
    assert_eq!(
        json.error.as_deref(),
        Some("Switch Machine with matching Id 2 does not exist")
    );
}

#[tokio::test]
async fn test_get_malformed_id() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "GET", "/api/switchmachines/abc", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Update Tests
// ============================================================================

#[tokio::test]
async fn test_put_throws_switch_machine() {
    let (app, bus) = create_test_app();
    // Port 0, code 1: resting at position 0
    send(&app, "POST", "/api/switchmachines/mockrxdata", "10").await;

    let response = send(
        &app,
        "PUT",
        "/api/switchmachines",
        r#"[{"id": 0, "position": "position1", "gpio0": "on"}]"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json_put: ApiResponse<Vec<UpdateResult>> = json(response).await;
    assert!(json_put.success);

    // Motor to position 1 plus GPIO0, upper nibble of the last byte
    assert_eq!(bus.last_transmit(), Some(vec![0x00, 0x90]));

    let response = send(&app, "GET", "/api/switchmachines/0", "").await;
    let json: ApiResponse<SwitchMachineResponse> = json(response).await;
    let machine = json.data.unwrap();
    assert_eq!(machine.position, Position::Position0);
    assert_eq!(machine.motor_state, MotorState::ToPosition1);
    assert_eq!(machine.gpio0, GpioState::On);
}

#[tokio::test]
async fn test_put_reports_per_item_failures() {
    let (app, _bus) = create_test_app();
    send(&app, "POST", "/api/switchmachines/mockrxdata", "10").await;

    let response = send(
        &app,
        "PUT",
        "/api/switchmachines",
        r#"[{"id": 0, "gpio1": "on"}, {"id": 7, "gpio1": "on"}]"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json: ApiResponse<Vec<UpdateResult>> = json(response).await;
    assert!(!json.success);
    let results = json.data.unwrap();
    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[1].id.get(), 7);
}

#[tokio::test]
async fn test_put_single_missing_id_is_not_found() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "PUT", "/api/switchmachines", r#"[{"id": 1}]"#).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_malformed_body() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "PUT", "/api/switchmachines", r#"{"id": 0}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, "PUT", "/api/switchmachines", "not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Mock Rx Tests
// ============================================================================

#[tokio::test]
async fn test_mock_rx_rejects_bad_hex() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "POST", "/api/switchmachines/mockrxdata", "3").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mock_rx_rejects_frame_of_wrong_length() {
    let (app, bus) = create_test_app();

    // Two bytes on a one-board bus
    let response = send(&app, "POST", "/api/switchmachines/mockrxdata", "3000").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<MockRxResponse> = json(response).await;
    assert_eq!(
        body.error.as_deref(),
        Some("Mock rx frame must be 1 bytes, got 2")
    );

    assert_eq!(bus.receive_count(), 0);
    let response = send(&app, "GET", "/api/switchmachines", "").await;
    let body: ApiResponse<Vec<SwitchMachineResponse>> = json(response).await;
    assert_eq!(body.data, Some(vec![]));
}

#[tokio::test]
async fn test_mock_rx_disabled_without_mock_bus() {
    let bus = MockTransport::new(1);
    let state = Arc::new(ApiState::new(create_controller(&bus)));
    let app = build_router(state, &WebServerConfig::default());

    let response = send(&app, "POST", "/api/switchmachines/mockrxdata", "30").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route() {
    let (app, _bus) = create_test_app();

    let response = send(&app, "GET", "/api/nothing", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
