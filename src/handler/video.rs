use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::ApiJsonResult;
use crate::registry::{SIMULATION_ID, VideoRegistry};

pub fn video_router() -> Router<Arc<VideoRegistry>> {
    Router::new()
        .route("/simulation/start", post(start_simulation))
        .route("/simulation/stop", post(stop_simulation))
        .route("/simulation/state", get(simulation_state))
        .route("/simulation/command", post(simulation_command))
        .route("/capture/start", post(start_capture))
        .route("/ingest/start", post(start_ingest))
        .route("/stop/{id}", post(stop_video))
        .route("/list", get(list_videos))
}

#[derive(Deserialize)]
struct StartSimulationRequest {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    recording_path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct StartCaptureRequest {
    id: String,
    device: String,
}

#[derive(Deserialize)]
struct StartIngestRequest {
    id: String,
    url: String,
}

#[derive(Serialize)]
struct StartResponse {
    ok: bool,
    ws_url: Option<String>,
    stream_port: u16,
}

#[derive(Serialize)]
struct StateResponse {
    running: bool,
    ws_url: Option<String>,
    stream_port: Option<u16>,
}

#[derive(Serialize)]
struct CommandResponse {
    sent: bool,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

async fn start_simulation(
    State(registry): State<Arc<VideoRegistry>>,
    Json(request): Json<StartSimulationRequest>,
) -> ApiJsonResult<StartResponse> {
    let active = registry
        .start_simulation(request.command, request.args, request.recording_path)
        .await?;
    Ok(Json(StartResponse {
        ok: true,
        ws_url: active.ws_url,
        stream_port: active.stream_port,
    }))
}

async fn stop_simulation(
    State(registry): State<Arc<VideoRegistry>>,
) -> ApiJsonResult<OkResponse> {
    registry.stop(SIMULATION_ID).await;
    Ok(Json(OkResponse { ok: true }))
}

async fn simulation_state(
    State(registry): State<Arc<VideoRegistry>>,
) -> ApiJsonResult<StateResponse> {
    let state = registry.state(SIMULATION_ID).await;
    Ok(Json(match state {
        Some(active) => StateResponse {
            running: true,
            ws_url: active.ws_url,
            stream_port: Some(active.stream_port),
        },
        None => StateResponse {
            running: false,
            ws_url: None,
            stream_port: None,
        },
    }))
}

/// Best-effort: `sent: false` means no live producer, not a server error.
async fn simulation_command(
    State(registry): State<Arc<VideoRegistry>>,
    Json(command): Json<Value>,
) -> ApiJsonResult<CommandResponse> {
    let sent = registry.send_command(SIMULATION_ID, &command).await;
    Ok(Json(CommandResponse { sent }))
}

async fn start_capture(
    State(registry): State<Arc<VideoRegistry>>,
    Json(request): Json<StartCaptureRequest>,
) -> ApiJsonResult<StartResponse> {
    let active = registry.start_capture(&request.id, request.device).await?;
    Ok(Json(StartResponse {
        ok: true,
        ws_url: active.ws_url,
        stream_port: active.stream_port,
    }))
}

async fn start_ingest(
    State(registry): State<Arc<VideoRegistry>>,
    Json(request): Json<StartIngestRequest>,
) -> ApiJsonResult<StartResponse> {
    let active = registry.start_ingest(&request.id, request.url).await?;
    Ok(Json(StartResponse {
        ok: true,
        ws_url: active.ws_url,
        stream_port: active.stream_port,
    }))
}

async fn stop_video(
    State(registry): State<Arc<VideoRegistry>>,
    Path(id): Path<String>,
) -> ApiJsonResult<OkResponse> {
    registry.stop(&id).await;
    Ok(Json(OkResponse { ok: true }))
}

async fn list_videos(State(registry): State<Arc<VideoRegistry>>) -> Json<Vec<String>> {
    Json(registry.list().await)
}
