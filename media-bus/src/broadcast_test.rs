// ============================================================================
// Broadcaster tests
// ============================================================================

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::pipeline::PipelineEvent;

use super::Broadcaster;

async fn bind_ephemeral() -> (Broadcaster, broadcast::Receiver<PipelineEvent>) {
    let (events, rx) = broadcast::channel(64);
    let broadcaster = Broadcaster::bind(0, events).await.unwrap();
    (broadcaster, rx)
}

async fn wait_for_count(broadcaster: &Broadcaster, n: usize) {
    for _ in 0..200 {
        if broadcaster.viewer_count() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "viewer count stuck at {}, wanted {}",
        broadcaster.viewer_count(),
        n
    );
}

#[tokio::test]
async fn test_bind_ephemeral_port_is_discoverable() {
    let (broadcaster, _rx) = bind_ephemeral().await;
    assert_ne!(broadcaster.port(), 0);
    assert_eq!(broadcaster.viewer_count(), 0);
}

#[tokio::test]
async fn test_broadcast_reaches_every_viewer() {
    let (broadcaster, _rx) = bind_ephemeral().await;
    let port = broadcaster.port();

    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    }
    wait_for_count(&broadcaster, 3).await;

    broadcaster.broadcast(Bytes::from_static(b"chunk-one"));

    for viewer in &mut viewers {
        let mut buf = [0u8; 9];
        tokio::time::timeout(Duration::from_secs(2), viewer.read_exact(&mut buf))
            .await
            .expect("viewer starved")
            .unwrap();
        assert_eq!(&buf, b"chunk-one");
    }
}

#[tokio::test]
async fn test_closed_viewer_is_dropped_lazily() {
    let (broadcaster, _rx) = bind_ephemeral().await;
    let port = broadcaster.port();

    let mut keep_a = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut keep_b = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let closer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_count(&broadcaster, 3).await;

    drop(closer);

    // The dead connection is discovered on subsequent broadcasts, never
    // eagerly; keep sending until the set shrinks.
    for _ in 0..200 {
        broadcaster.broadcast(Bytes::from_static(b"ping"));
        if broadcaster.viewer_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broadcaster.viewer_count(), 2);

    broadcaster.broadcast(Bytes::from_static(b"done!"));

    // The survivors got everything, ending with the final marker.
    for viewer in [&mut keep_a, &mut keep_b] {
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(2), viewer.read(&mut buf))
                .await
                .expect("viewer starved")
                .unwrap();
            assert_ne!(n, 0, "connection closed unexpectedly");
            seen.extend_from_slice(&buf[..n]);
            if seen.ends_with(b"done!") {
                break;
            }
        }
        assert!(seen.starts_with(b"ping"));
    }
}

#[tokio::test]
async fn test_viewer_count_events() {
    let (broadcaster, mut rx) = bind_ephemeral().await;
    let port = broadcaster.port();

    let _viewer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_count(&broadcaster, 1).await;

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, PipelineEvent::ViewerCount(1)));
}

#[tokio::test]
async fn test_broadcast_with_no_viewers_is_a_noop() {
    let (broadcaster, _rx) = bind_ephemeral().await;
    broadcaster.broadcast(Bytes::from_static(b"nobody home"));
    assert_eq!(broadcaster.viewer_count(), 0);
}

#[tokio::test]
async fn test_shutdown_clears_viewers() {
    let (broadcaster, _rx) = bind_ephemeral().await;
    let port = broadcaster.port();

    let mut viewer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_count(&broadcaster, 1).await;

    broadcaster.shutdown();
    assert_eq!(broadcaster.viewer_count(), 0);

    // The writer task ends and the viewer sees EOF.
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), viewer.read(&mut buf))
        .await
        .expect("no EOF after shutdown")
        .unwrap();
    assert_eq!(n, 0);
}
