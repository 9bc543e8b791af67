// ============================================================================
// Startup handshake tests
// ============================================================================

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::pipeline::PipelineEvent;
use crate::protocol::ControlResponse;

use super::{ReadyInfo, await_ready};

fn response(kind: &str) -> ControlResponse {
    ControlResponse {
        kind: kind.to_string(),
        url: None,
        message: None,
        traceback: None,
        rest: serde_json::Map::new(),
    }
}

fn ready(url: &str) -> PipelineEvent {
    PipelineEvent::Response(ControlResponse {
        url: Some(url.to_string()),
        ..response("server-ready")
    })
}

#[tokio::test]
async fn test_resolves_on_server_ready() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(ready("ws://x")).unwrap();

    let info = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap();
    assert_eq!(info, ReadyInfo { url: "ws://x".to_string() });
}

#[tokio::test]
async fn test_ignores_noise_before_readiness() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(PipelineEvent::ViewerCount(1)).unwrap();
    tx.send(PipelineEvent::Response(response("episode-done"))).unwrap();
    tx.send(ready("ws://after-noise")).unwrap();

    let info = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap();
    assert_eq!(info.url, "ws://after-noise");
}

#[tokio::test]
async fn test_ready_without_url_is_not_a_settlement() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(PipelineEvent::Response(response("server-ready"))).unwrap();
    tx.send(ready("ws://second-try")).unwrap();

    let info = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap();
    assert_eq!(info.url, "ws://second-try");
}

#[tokio::test]
async fn test_rejects_on_error_response() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(PipelineEvent::Response(ControlResponse {
        message: Some("mujoco scene failed to load".to_string()),
        ..response("error")
    }))
    .unwrap();

    let err = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap_err();
    assert!(err.to_string().contains("mujoco scene failed to load"));
}

#[tokio::test]
async fn test_rejects_on_early_producer_exit() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(PipelineEvent::ProducerExit(Some(7))).unwrap();

    let err = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap_err();
    assert!(err.to_string().contains("code 7"), "got: {}", err);
}

#[tokio::test]
async fn test_rejects_on_spawn_error() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(PipelineEvent::SpawnError("failed to spawn producer python3".to_string()))
        .unwrap();

    let err = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap_err();
    assert!(err.to_string().contains("failed to spawn producer"));
}

#[tokio::test]
async fn test_times_out_when_nothing_arrives() {
    let (_tx, mut rx) = broadcast::channel::<PipelineEvent>(16);

    let started = Instant::now();
    let err = await_ready(&mut rx, Duration::from_millis(50)).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.to_string().contains("timed out"), "got: {}", err);
    assert!(elapsed >= Duration::from_millis(50), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "fired late: {:?}", elapsed);
}

#[tokio::test]
async fn test_first_settlement_wins() {
    let (tx, mut rx) = broadcast::channel(16);
    tx.send(ready("ws://first")).unwrap();
    // Arrives after settlement; only the persistent channel sees it.
    tx.send(PipelineEvent::Response(ControlResponse {
        message: Some("late failure".to_string()),
        ..response("error")
    }))
    .unwrap();

    let info = await_ready(&mut rx, Duration::from_secs(1)).await.unwrap();
    assert_eq!(info.url, "ws://first");
}
