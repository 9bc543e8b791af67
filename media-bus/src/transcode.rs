//! Transcoder argument contract.
//!
//! Every variant produces the same two sinks: an encoded recording written to
//! `recording_path` and a low-latency stream on stdout for the broadcaster.
//! Only the input half differs: raw frames on stdin for the spawn variant, a
//! named capture device for capture, a network URL for ingest.

use std::path::Path;

use crate::types::{EncodeConfig, PipelineConfig, RawInputConfig, SourceConfig};

/// Container format of the streamed sink.
pub const STREAM_FORMAT: &str = "mpegts";

/// Build the full transcoder argument list for a pipeline config.
pub fn transcoder_args(config: &PipelineConfig) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-y".to_string(),
    ];
    args.extend(input_args(&config.source, &config.transcoder.raw_input));
    args.extend(record_sink_args(
        &config.transcoder.record_encode,
        &config.recording_path,
    ));
    args.extend(stream_sink_args(&config.transcoder.stream_encode));
    args
}

fn input_args(source: &SourceConfig, raw: &RawInputConfig) -> Vec<String> {
    match source {
        SourceConfig::Spawn { .. } => vec![
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            raw.pixel_format.clone(),
            "-video_size".to_string(),
            format!("{}x{}", raw.width, raw.height),
            "-framerate".to_string(),
            raw.fps.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
        ],
        SourceConfig::Capture { device } => vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            device.clone(),
        ],
        SourceConfig::Ingest { url } => vec!["-i".to_string(), url.clone()],
    }
}

fn encode_args(encode: &EncodeConfig) -> Vec<String> {
    let mut args = vec!["-c:v".to_string(), encode.codec.clone()];
    if let Some(preset) = &encode.preset {
        args.push("-preset".to_string());
        args.push(preset.clone());
    }
    if let Some(tune) = &encode.tune {
        args.push("-tune".to_string());
        args.push(tune.clone());
    }
    if let Some(bitrate) = encode.bitrate {
        args.push("-b:v".to_string());
        args.push(bitrate.to_string());
    }
    args
}

fn record_sink_args(encode: &EncodeConfig, path: &Path) -> Vec<String> {
    let mut args = encode_args(encode);
    args.push(path.to_string_lossy().into_owned());
    args
}

fn stream_sink_args(encode: &EncodeConfig) -> Vec<String> {
    let mut args = encode_args(encode);
    args.push("-f".to_string());
    args.push(STREAM_FORMAT.to_string());
    args.push("pipe:1".to_string());
    args
}

#[cfg(test)]
#[path = "transcode_test.rs"]
mod transcode_test;
