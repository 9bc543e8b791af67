use std::path::PathBuf;
use std::time::Duration;

/// Where the video comes from. Exactly one variant is active per pipeline
/// instance.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    /// External producer process writing raw frames to stdout and control
    /// traffic on stderr/stdin.
    Spawn { command: String, args: Vec<String> },
    /// Local capture device read directly by the transcoder.
    Capture { device: String },
    /// Remote stream pulled directly by the transcoder.
    Ingest { url: String },
}

impl SourceConfig {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Spawn { .. } => "spawn",
            SourceConfig::Capture { .. } => "capture",
            SourceConfig::Ingest { .. } => "ingest",
        }
    }
}

/// Raw frame contract for the spawn variant: what the producer writes on
/// stdout. The defaults match a producer emitting rgb24 640x480 at 30 fps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInputConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: String,
}

impl Default for RawInputConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            pixel_format: "rgb24".to_string(),
        }
    }
}

/// Encoder settings for one transcoder sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeConfig {
    // "libx264", "libx265", ...
    pub codec: String,
    // "ultrafast", "medium", etc.
    pub preset: Option<String>,
    pub tune: Option<String>,
    // bps
    pub bitrate: Option<u64>,
}

impl EncodeConfig {
    /// Settings for the streamed sink: latency over quality. Mandatory for
    /// the live output so viewers stay close to real time.
    pub fn low_latency() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: Some("ultrafast".to_string()),
            tune: Some("zerolatency".to_string()),
            bitrate: None,
        }
    }

    /// Settings for the recorded sink; quality can be spent here freely.
    pub fn recording() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: Some("medium".to_string()),
            tune: None,
            bitrate: None,
        }
    }
}

/// The transcoder invocation: an already-resolved executable plus encoder
/// settings per sink. Binary resolution happens outside the core.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub program: PathBuf,
    pub raw_input: RawInputConfig,
    pub stream_encode: EncodeConfig,
    pub record_encode: EncodeConfig,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            raw_input: RawInputConfig::default(),
            stream_encode: EncodeConfig::low_latency(),
            record_encode: EncodeConfig::recording(),
        }
    }
}

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything needed to launch one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    /// Sink for the persisted encode, written for the pipeline's lifetime
    /// and finalized on graceful stop.
    pub recording_path: PathBuf,
    pub transcoder: TranscoderConfig,
    /// 0 binds an ephemeral port; the bound port is discoverable afterwards.
    pub listen_port: u16,
    pub handshake_timeout: Duration,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    source: Option<SourceConfig>,
    recording_path: Option<PathBuf>,
    transcoder: Option<TranscoderConfig>,
    listen_port: u16,
    handshake_timeout: Option<Duration>,
}

impl PipelineConfigBuilder {
    /// Use a spawned producer process as the source.
    pub fn spawn_source(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.source = Some(SourceConfig::Spawn {
            command: command.into(),
            args,
        });
        self
    }

    /// Use a local capture device as the source.
    pub fn capture_source(mut self, device: impl Into<String>) -> Self {
        self.source = Some(SourceConfig::Capture {
            device: device.into(),
        });
        self
    }

    /// Use a remote stream URL as the source.
    pub fn ingest_source(mut self, url: impl Into<String>) -> Self {
        self.source = Some(SourceConfig::Ingest { url: url.into() });
        self
    }

    pub fn recording_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.recording_path = Some(path.into());
        self
    }

    pub fn transcoder(mut self, transcoder: TranscoderConfig) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> PipelineConfig {
        PipelineConfig {
            source: self.source.expect("source is required"),
            recording_path: self.recording_path.expect("recording_path is required"),
            transcoder: self.transcoder.unwrap_or_default(),
            listen_port: self.listen_port,
            handshake_timeout: self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
