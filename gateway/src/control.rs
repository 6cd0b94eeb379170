//! # control
//!
//! The control-plane HTTP surface, assumed to sit on a trusted loopback:
//!
//! - `POST /send_command`: queue a Codec 12 text command for a device.
//!   Replies 200 on enqueue; it does not wait for the device.
//! - `GET /device_status`: presence of every connected device.
//! - `GET /health`: liveness plus queue depth.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use crate::state::GatewayState;

/// Commands are plain ASCII text; anything longer than this is a caller bug.
const MAX_COMMAND_LEN: usize = 200;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/send_command", post(send_command))
        .route("/device_status", get(device_status))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn run_control_server(
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let addr = state.config.control_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind control endpoint on {addr}"))?;
    info!(addr = %addr, "control endpoint started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("control endpoint failed")
}

#[derive(Debug, Deserialize)]
struct SendCommandRequest {
    imei: Option<String>,
    command: Option<String>,
    command_id: Option<String>,
}

async fn send_command(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<SendCommandRequest>,
) -> (StatusCode, Json<Value>) {
    let (Some(imei), Some(command)) = (request.imei, request.command) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "message": "imei and command are required",
            })),
        );
    };
    if command.is_empty() || command.len() > MAX_COMMAND_LEN || !command.is_ascii() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "message": "command must be ASCII, 1..=200 bytes",
            })),
        );
    }

    let command_id = state
        .commands
        .enqueue(&imei, &command, request.command_id)
        .await;

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": "Command queued successfully",
            "imei": imei,
            "command": command,
            "command_id": command_id,
        })),
    )
}

async fn device_status(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let devices = state.registry.snapshot().await;
    Json(json!({
        "status": "success",
        "total_connected": devices.len(),
        "connected_devices": devices,
    }))
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "connected_devices": state.registry.connected_count().await,
        "pending_commands": state.commands.pending_count().await,
    }))
}
