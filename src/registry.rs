use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use media_bus::protocol::ERROR_KIND;
use media_bus::{PipelineConfig, PipelineEvent, SourceConfig, VideoPipeline, await_ready};

use crate::config;

/// Id under which the simulator pipeline is registered.
pub const SIMULATION_ID: &str = "simulation";

/// One live pipeline plus what the UI needs to reach it.
#[derive(Clone)]
pub struct ActiveVideo {
    pub pipeline: Arc<VideoPipeline>,
    /// Control endpoint announced by the producer; spawn variant only.
    pub ws_url: Option<String>,
    pub stream_port: u16,
}

impl std::fmt::Debug for ActiveVideo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveVideo")
            .field("ws_url", &self.ws_url)
            .field("stream_port", &self.stream_port)
            .finish_non_exhaustive()
    }
}

/// Explicit map of named pipelines, owned by main and shared with the API
/// layer. Nothing outside it holds process handles.
pub struct VideoRegistry {
    videos: RwLock<HashMap<String, ActiveVideo>>,
    // Handed to relay tasks so a dead registry never keeps them alive.
    weak: Weak<VideoRegistry>,
}

impl VideoRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            videos: RwLock::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    /// Spawn the simulator chain and wait for it to announce readiness.
    pub async fn start_simulation(
        &self,
        command: String,
        args: Vec<String>,
        recording_path: Option<PathBuf>,
    ) -> anyhow::Result<ActiveVideo> {
        let cfg = config::config();
        let pipeline_config = PipelineConfig::builder()
            .spawn_source(command, args)
            .recording_path(recording_path.unwrap_or_else(|| default_recording(SIMULATION_ID)))
            .transcoder(cfg.transcoder())
            .handshake_timeout(cfg.handshake_timeout())
            .build();
        self.start_pipeline(SIMULATION_ID, pipeline_config).await
    }

    /// Stream a local capture device.
    pub async fn start_capture(
        &self,
        id: &str,
        device: String,
    ) -> anyhow::Result<ActiveVideo> {
        let pipeline_config = PipelineConfig::builder()
            .capture_source(device)
            .recording_path(default_recording(id))
            .transcoder(config::config().transcoder())
            .build();
        self.start_pipeline(id, pipeline_config).await
    }

    /// Re-stream a remote feed.
    pub async fn start_ingest(
        &self,
        id: &str,
        url: String,
    ) -> anyhow::Result<ActiveVideo> {
        let pipeline_config = PipelineConfig::builder()
            .ingest_source(url)
            .recording_path(default_recording(id))
            .transcoder(config::config().transcoder())
            .build();
        self.start_pipeline(id, pipeline_config).await
    }

    /// Start a pipeline under `id`, replacing and stopping whatever ran
    /// there before. For the spawn variant this includes the startup
    /// handshake; on any failure the pipeline is torn down before the error
    /// is returned, so a failed start leaves no processes behind.
    pub async fn start_pipeline(
        &self,
        id: &str,
        pipeline_config: PipelineConfig,
    ) -> anyhow::Result<ActiveVideo> {
        self.stop(id).await;

        let pipeline = Arc::new(VideoPipeline::new(pipeline_config));
        let mut events = pipeline.subscribe();

        let stream_port = match pipeline.start().await {
            Ok(port) => port,
            Err(e) => {
                pipeline.shutdown().await;
                return Err(e);
            }
        };

        let ws_url = match &pipeline.config().source {
            SourceConfig::Spawn { .. } => {
                let timeout = pipeline.config().handshake_timeout;
                match await_ready(&mut events, timeout).await {
                    Ok(info) => Some(info.url),
                    Err(e) => {
                        log::warn!("Registry: startup of '{}' failed: {}", id, e);
                        pipeline.shutdown().await;
                        return Err(e);
                    }
                }
            }
            _ => None,
        };

        let active = ActiveVideo {
            pipeline: Arc::clone(&pipeline),
            ws_url,
            stream_port,
        };
        let displaced = self
            .videos
            .write()
            .await
            .insert(id.to_string(), active.clone());
        if let Some(displaced) = displaced {
            // A concurrent start slipped in while we were handshaking.
            displaced.pipeline.shutdown().await;
        }
        self.spawn_relay(id.to_string(), events, Arc::downgrade(&pipeline));
        log::info!("Registry: '{}' running, stream port {}", id, stream_port);
        Ok(active)
    }

    /// Stop and forget a pipeline. Unknown ids are a no-op, never an error.
    pub async fn stop(&self, id: &str) {
        let removed = self.videos.write().await.remove(id);
        if let Some(active) = removed {
            active.pipeline.shutdown().await;
            log::info!("Registry: '{}' stopped", id);
        }
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.videos.read().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    pub async fn state(&self, id: &str) -> Option<ActiveVideo> {
        self.videos.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        self.videos.read().await.keys().cloned().collect()
    }

    /// Best-effort forward to the producer; false when the id is unknown or
    /// the producer is gone.
    pub async fn send_command(&self, id: &str, cmd: &Value) -> bool {
        match self.state(id).await {
            Some(active) => active.pipeline.send_command(cmd).await,
            None => false,
        }
    }

    /// Forward post-startup events to the log and react to terminal ones.
    /// This is the consumer of the persistent error surface; a handshake that
    /// already settled never re-triggers.
    fn spawn_relay(
        &self,
        id: String,
        mut events: broadcast::Receiver<PipelineEvent>,
        pipeline: Weak<VideoPipeline>,
    ) {
        let registry = self.weak.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Registry: relay for '{}' lagged {} events", id, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    PipelineEvent::Response(response) if response.kind == ERROR_KIND => {
                        log::error!(
                            "Registry: '{}' reported an error: {}",
                            id,
                            response.message.as_deref().unwrap_or("unknown error")
                        );
                    }
                    PipelineEvent::Response(response) => {
                        log::debug!("Registry: '{}' response: {}", id, response.kind);
                    }
                    PipelineEvent::TranscoderExit(code) => {
                        log::error!(
                            "Registry: '{}' transcoder died with {:?}, stopping",
                            id,
                            code
                        );
                        // Only unregister if the entry still refers to this
                        // pipeline; a replacement must not be torn down by
                        // its predecessor's death.
                        if let (Some(registry), Some(pipeline)) =
                            (registry.upgrade(), pipeline.upgrade())
                        {
                            let current = registry.state(&id).await;
                            if current.is_some_and(|a| Arc::ptr_eq(&a.pipeline, &pipeline)) {
                                registry.stop(&id).await;
                            }
                        }
                        break;
                    }
                    PipelineEvent::ProducerExit(code) => {
                        log::warn!("Registry: '{}' producer exited with {:?}", id, code);
                    }
                    PipelineEvent::SpawnError(message) => {
                        log::error!("Registry: '{}' spawn failure: {}", id, message);
                    }
                    PipelineEvent::ViewerCount(count) => {
                        log::info!("Registry: '{}' viewers: {}", id, count);
                    }
                }
            }
        });
    }
}

fn default_recording(id: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    config::config()
        .recording_dir()
        .join(format!("{}_{}.mp4", id, stamp))
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
