//! Pipeline supervision: producer + transcoder lifecycle, stream piping and
//! the line-framed control protocol on the producer's standard streams.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::framing::LineFramer;
use crate::protocol::{self, ControlResponse, StderrEvent};
use crate::transcode;
use crate::types::{PipelineConfig, SourceConfig};

/// Capacity of the pipeline event channel.
const EVENT_CAPACITY: usize = 256;
/// How long a stopped transcoder gets to finalize the recording before it is
/// killed outright.
const TRANSCODER_GRACE: Duration = Duration::from_secs(2);
/// Read buffer for the stderr reader and the broadcast pump.
const READ_BUF: usize = 8 * 1024;

/// Everything the pipeline reports to its subscribers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A sentinel-prefixed control message from the producer.
    Response(ControlResponse),
    /// Producer exited on its own (a kill through `stop_all` does not emit).
    ProducerExit(Option<i32>),
    /// Transcoder exited on its own. Terminal: the pipeline stops itself.
    TranscoderExit(Option<i32>),
    /// Producer or transcoder could not be spawned.
    SpawnError(String),
    /// A viewer connected or disconnected.
    ViewerCount(usize),
}

#[derive(Default)]
struct PipelineState {
    producer_stdin: Option<ChildStdin>,
    producer_kill: Option<CancellationToken>,
    transcoder_kill: Option<CancellationToken>,
    framer: LineFramer,
    broadcaster: Option<Arc<Broadcaster>>,
}

/// Clear process handles and the partial-line buffer. The broadcast server
/// stays up; `shutdown` takes that down too.
fn stop_state(state: &mut PipelineState) {
    // Closing stdin first gives the producer a chance to exit on its own.
    state.producer_stdin.take();
    if let Some(kill) = state.producer_kill.take() {
        kill.cancel();
    }
    if let Some(kill) = state.transcoder_kill.take() {
        kill.cancel();
    }
    state.framer.clear();
}

/// Owns one producer/transcoder pair and the broadcast server they feed.
///
/// Process handles live behind a single mutex and are mutated only by the
/// pipeline's own tasks; callers observe the pipeline exclusively through
/// [`PipelineEvent`]s and the query methods.
pub struct VideoPipeline {
    config: PipelineConfig,
    events: broadcast::Sender<PipelineEvent>,
    state: Arc<Mutex<PipelineState>>,
}

impl VideoPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            events,
            state: Arc::new(Mutex::new(PipelineState::default())),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Subscribe to the pipeline's event stream. Dropping the receiver is
    /// the unsubscribe. Events keep flowing here after the handshake has
    /// settled; this is the persistent error surface.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Bind the viewer broadcast server. Idempotent: an already-listening
    /// pipeline just reports its bound port.
    pub async fn start_server(&self) -> anyhow::Result<u16> {
        let mut state = self.state.lock().await;
        self.start_server_locked(&mut state).await
    }

    async fn start_server_locked(&self, state: &mut PipelineState) -> anyhow::Result<u16> {
        if let Some(broadcaster) = &state.broadcaster {
            return Ok(broadcaster.port());
        }
        let broadcaster =
            Broadcaster::bind(self.config.listen_port, self.events.clone()).await?;
        let port = broadcaster.port();
        log::info!("Pipeline: broadcast server listening on port {}", port);
        state.broadcaster = Some(Arc::new(broadcaster));
        Ok(port)
    }

    /// Launch the configured source and transcoder. Any previously running
    /// pair is stopped first: at most one is ever live per instance.
    /// Returns the broadcast port. Readiness of the spawn variant is a
    /// separate concern, see [`crate::handshake::await_ready`].
    pub async fn start(&self) -> anyhow::Result<u16> {
        self.stop_all().await;

        let mut state = self.state.lock().await;
        let port = self.start_server_locked(&mut state).await?;

        let transcoder_args = transcode::transcoder_args(&self.config);
        log::info!(
            "Pipeline: starting {} transcoder: {} {}",
            self.config.source.kind(),
            self.config.transcoder.program.display(),
            transcoder_args.join(" ")
        );

        let mut transcoder = match Command::new(&self.config.transcoder.program)
            .args(&transcoder_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let msg = format!(
                    "failed to spawn transcoder {}: {}",
                    self.config.transcoder.program.display(),
                    e
                );
                let _ = self.events.send(PipelineEvent::SpawnError(msg.clone()));
                return Err(anyhow::anyhow!(msg));
            }
        };

        let transcoder_stdin = transcoder.stdin.take();
        let transcoder_stdout = transcoder.stdout.take();
        let transcoder_stderr = transcoder.stderr.take();

        // Spawn variant: the transcoder's stdin carries the producer's raw
        // frames. Otherwise it stays idle and is used for the graceful quit.
        let (pipe_stdin, quit_stdin) = match &self.config.source {
            SourceConfig::Spawn { .. } => (transcoder_stdin, None),
            _ => (None, transcoder_stdin),
        };

        if let SourceConfig::Spawn { command, args } = &self.config.source {
            log::info!("Pipeline: starting producer: {} {}", command, args.join(" "));
            let mut producer = match Command::new(command)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => child,
                Err(e) => {
                    let msg = format!("failed to spawn producer {}: {}", command, e);
                    let _ = self.events.send(PipelineEvent::SpawnError(msg.clone()));
                    reap(transcoder);
                    return Err(anyhow::anyhow!(msg));
                }
            };

            state.producer_stdin = producer.stdin.take();

            if let (Some(stdout), Some(stdin)) = (producer.stdout.take(), pipe_stdin) {
                spawn_frame_pump(stdout, stdin);
            }
            if let Some(stderr) = producer.stderr.take() {
                self.spawn_control_reader(stderr);
            }

            let kill = CancellationToken::new();
            state.producer_kill = Some(kill.clone());
            self.spawn_producer_watcher(producer, kill);
        }

        if let Some(stdout) = transcoder_stdout {
            if let Some(broadcaster) = &state.broadcaster {
                spawn_broadcast_pump(stdout, Arc::clone(broadcaster));
            }
        }
        if let Some(stderr) = transcoder_stderr {
            spawn_transcoder_logger(stderr);
        }

        let kill = CancellationToken::new();
        state.transcoder_kill = Some(kill.clone());
        self.spawn_transcoder_watcher(transcoder, quit_stdin, kill);

        Ok(port)
    }

    /// Best-effort write of one command line to the producer's stdin.
    ///
    /// Returns `false` when there is no live producer or the write fails; a
    /// failed write drops the handle. Never buffers, never errors.
    pub async fn send_command(&self, cmd: &Value) -> bool {
        let mut state = self.state.lock().await;
        let Some(stdin) = state.producer_stdin.as_mut() else {
            log::warn!("Pipeline: dropping command, no producer stdin");
            return false;
        };
        let line = protocol::serialize_command(cmd);
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            log::warn!("Pipeline: command write failed: {}", e);
            state.producer_stdin = None;
            return false;
        }
        if let Err(e) = stdin.flush().await {
            log::warn!("Pipeline: command flush failed: {}", e);
            state.producer_stdin = None;
            return false;
        }
        true
    }

    /// Stop producer and transcoder and reset the line buffer. Safe to call
    /// at any time, any number of times; returns without waiting for the
    /// processes to finish dying.
    pub async fn stop_all(&self) {
        let mut state = self.state.lock().await;
        stop_state(&mut state);
    }

    /// [`stop_all`](Self::stop_all) plus the broadcast server and all of its
    /// viewers.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        stop_state(&mut state);
        if let Some(broadcaster) = state.broadcaster.take() {
            broadcaster.shutdown();
        }
    }

    /// True while a producer or transcoder is held (started and not yet
    /// stopped).
    pub async fn is_running(&self) -> bool {
        let state = self.state.lock().await;
        state.producer_kill.is_some() || state.transcoder_kill.is_some()
    }

    /// Bound broadcast port, if the server has been started.
    pub async fn port(&self) -> Option<u16> {
        let state = self.state.lock().await;
        state.broadcaster.as_ref().map(|b| b.port())
    }

    pub async fn viewer_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .broadcaster
            .as_ref()
            .map_or(0, |b| b.viewer_count())
    }

    /// stderr -> LineFramer -> protocol -> events. Plain lines go to the log;
    /// the framer lives in the pipeline state so `stop_all` resets it.
    fn spawn_control_reader(&self, mut stderr: ChildStderr) {
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut buf = [0u8; READ_BUF];
            loop {
                let n = match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let lines = state.lock().await.framer.feed(&buf[..n]);
                for line in lines {
                    match protocol::interpret(&line) {
                        StderrEvent::Response(response) => {
                            let _ = events.send(PipelineEvent::Response(response));
                        }
                        StderrEvent::Log(text) => {
                            if !text.trim().is_empty() {
                                log::info!("Producer: {}", text);
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_producer_watcher(&self, mut child: Child, kill: CancellationToken) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = kill.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    log::info!("Pipeline: producer exited with {:?}", code);
                    let _ = events.send(PipelineEvent::ProducerExit(code));
                }
            }
        });
    }

    /// An unexpected transcoder exit is terminal: without it there is no
    /// stream and no recording, so the whole pipeline is stopped to avoid an
    /// orphaned producer.
    fn spawn_transcoder_watcher(
        &self,
        mut child: Child,
        quit_stdin: Option<ChildStdin>,
        kill: CancellationToken,
    ) {
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut quit_stdin = quit_stdin;
            tokio::select! {
                biased;
                _ = kill.cancelled() => {
                    if let Some(mut stdin) = quit_stdin.take() {
                        // "q" asks the transcoder to finalize the recording.
                        // The spawn variant gets the same effect from EOF on
                        // its frame pipe once the producer is gone.
                        let _ = stdin.write_all(b"q\n").await;
                        let _ = stdin.shutdown().await;
                    }
                    tokio::select! {
                        _ = child.wait() => {}
                        _ = tokio::time::sleep(TRANSCODER_GRACE) => {
                            log::warn!("Pipeline: transcoder ignored graceful stop, killing");
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                        }
                    }
                }
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    log::warn!("Pipeline: transcoder exited unexpectedly with {:?}", code);
                    let _ = events.send(PipelineEvent::TranscoderExit(code));
                    stop_state(&mut *state.lock().await);
                }
            }
        });
    }
}

/// Producer stdout -> transcoder stdin. Dropping the writer on EOF closes
/// the transcoder's input, which lets it finalize the recording.
fn spawn_frame_pump(mut stdout: ChildStdout, mut stdin: ChildStdin) {
    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut stdout, &mut stdin).await;
    });
}

/// Transcoder stdout -> broadcaster, chunk by chunk, in emission order.
fn spawn_broadcast_pump(mut stdout: ChildStdout, broadcaster: Arc<Broadcaster>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            broadcaster.broadcast(Bytes::copy_from_slice(&buf[..n]));
        }
    });
}

/// Transcoder diagnostics are plain text; keep them out of the control plane
/// and in the log.
fn spawn_transcoder_logger(mut stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; READ_BUF];
        loop {
            let n = match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for line in framer.feed(&buf[..n]) {
                if !line.trim().is_empty() {
                    log::debug!("Transcoder: {}", line);
                }
            }
        }
    });
}

/// Kill and reap a half-started child without holding anything up.
fn reap(mut child: Child) {
    let _ = child.start_kill();
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
