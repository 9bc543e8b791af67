use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use media_bus::TranscoderConfig;
use media_bus::types::DEFAULT_HANDSHAKE_TIMEOUT;

/// Process-wide settings. The transcoder binary and every producer command
/// line arrive here already resolved; the supervisor itself does no platform
/// detection.
pub struct StudioConfig {
    api_addr: String,
    transcoder_path: PathBuf,
    recording_dir: PathBuf,
    handshake_timeout: Duration,
}

impl StudioConfig {
    fn from_env() -> Self {
        let api_addr =
            std::env::var("STUDIO_API_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let transcoder_path = std::env::var("STUDIO_TRANSCODER")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("ffmpeg"));
        let recording_dir = std::env::var("STUDIO_RECORDING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("recordings"));
        let handshake_timeout = std::env::var("STUDIO_HANDSHAKE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
        Self {
            api_addr,
            transcoder_path,
            recording_dir,
            handshake_timeout,
        }
    }

    pub fn api_addr(&self) -> &str {
        &self.api_addr
    }

    pub fn recording_dir(&self) -> &Path {
        &self.recording_dir
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn transcoder(&self) -> TranscoderConfig {
        TranscoderConfig {
            program: self.transcoder_path.clone(),
            ..TranscoderConfig::default()
        }
    }
}

pub fn config() -> &'static StudioConfig {
    static CONFIG: LazyLock<StudioConfig> = LazyLock::new(StudioConfig::from_env);
    &CONFIG
}
