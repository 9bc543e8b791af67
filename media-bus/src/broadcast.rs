//! Viewer fan-out: a TCP server forwarding transcoded bytes to every
//! currently-open viewer connection.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineEvent;

/// Per-viewer queue depth. A viewer that falls this far behind starts losing
/// chunks on its own connection only; there is no backpressure on the
/// transcoder side.
const VIEWER_QUEUE: usize = 64;

struct Viewer {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

/// Accepts viewer connections and fans transcoder output out to all of them.
///
/// Raw byte forwarding only; clients frame the container format themselves.
/// The viewer set is touched by the accept loop, the per-connection writer
/// tasks and [`broadcast`](Broadcaster::broadcast), never by callers.
pub struct Broadcaster {
    port: u16,
    viewers: Arc<Mutex<Vec<Viewer>>>,
    events: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl Broadcaster {
    /// Bind the listen socket and start accepting. Port 0 picks an ephemeral
    /// port; the bound port is recorded for discovery via [`port`](Self::port).
    pub async fn bind(
        port: u16,
        events: broadcast::Sender<PipelineEvent>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = listener.local_addr()?.port();
        let viewers: Arc<Mutex<Vec<Viewer>>> = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let accept_viewers = Arc::clone(&viewers);
        let accept_events = events.clone();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut next_id = 0u64;
            loop {
                let (socket, addr) = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Broadcaster: accept failed: {}", e);
                            continue;
                        }
                    },
                };
                next_id += 1;
                let id = next_id;
                log::info!("Broadcaster: viewer {} connected from {}", id, addr);

                let (tx, rx) = mpsc::channel(VIEWER_QUEUE);
                let count = {
                    let mut viewers = accept_viewers.lock().unwrap();
                    viewers.push(Viewer { id, tx });
                    viewers.len()
                };
                let _ = accept_events.send(PipelineEvent::ViewerCount(count));

                spawn_viewer_writer(
                    id,
                    socket,
                    rx,
                    Arc::clone(&accept_viewers),
                    accept_events.clone(),
                    accept_cancel.clone(),
                );
            }
        });

        Ok(Self {
            port,
            viewers,
            events,
            cancel,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().unwrap().len()
    }

    /// Forward one chunk to every open viewer.
    ///
    /// A full queue drops the chunk for that viewer only; a closed queue
    /// means the writer task is gone and the viewer is removed here, lazily.
    /// Never fails.
    pub fn broadcast(&self, chunk: Bytes) {
        let mut removed = false;
        let count = {
            let mut viewers = self.viewers.lock().unwrap();
            viewers.retain(|viewer| match viewer.tx.try_send(chunk.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!("Broadcaster: viewer {} lagging, chunk dropped", viewer.id);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    removed = true;
                    false
                }
            });
            viewers.len()
        };
        if removed {
            let _ = self.events.send(PipelineEvent::ViewerCount(count));
        }
    }

    /// Stop accepting and drop every viewer connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.viewers.lock().unwrap().clear();
    }
}

fn spawn_viewer_writer(
    id: u64,
    mut socket: TcpStream,
    mut rx: mpsc::Receiver<Bytes>,
    viewers: Arc<Mutex<Vec<Viewer>>>,
    events: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            if let Err(e) = socket.write_all(&chunk).await {
                log::info!("Broadcaster: viewer {} dropped: {}", id, e);
                break;
            }
        }
        let count = {
            let mut viewers = viewers.lock().unwrap();
            viewers.retain(|viewer| viewer.id != id);
            viewers.len()
        };
        let _ = events.send(PipelineEvent::ViewerCount(count));
    });
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod broadcast_test;
