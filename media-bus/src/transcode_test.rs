// ============================================================================
// Transcoder argument contract tests
// ============================================================================

use crate::types::PipelineConfig;

use super::transcoder_args;

fn position(args: &[String], needle: &str) -> usize {
    args.iter()
        .position(|a| a == needle)
        .unwrap_or_else(|| panic!("{:?} not found in {:?}", needle, args))
}

#[test]
fn test_spawn_variant_reads_raw_frames_from_stdin() {
    let config = PipelineConfig::builder()
        .spawn_source("sim", vec![])
        .recording_path("/tmp/rec.mp4")
        .build();
    let args = transcoder_args(&config);

    let f = position(&args, "-f");
    assert_eq!(args[f + 1], "rawvideo");
    assert!(args.contains(&"rgb24".to_string()));
    assert!(args.contains(&"640x480".to_string()));
    assert!(args.contains(&"30".to_string()));
    let i = position(&args, "-i");
    assert_eq!(args[i + 1], "pipe:0");
}

#[test]
fn test_capture_variant_reads_device() {
    let config = PipelineConfig::builder()
        .capture_source("/dev/video2")
        .recording_path("/tmp/rec.mp4")
        .build();
    let args = transcoder_args(&config);

    let f = position(&args, "-f");
    assert_eq!(args[f + 1], "v4l2");
    let i = position(&args, "-i");
    assert_eq!(args[i + 1], "/dev/video2");
}

#[test]
fn test_ingest_variant_reads_url() {
    let config = PipelineConfig::builder()
        .ingest_source("rtsp://camera.local/stream")
        .recording_path("/tmp/rec.mp4")
        .build();
    let args = transcoder_args(&config);

    let i = position(&args, "-i");
    assert_eq!(args[i + 1], "rtsp://camera.local/stream");
    assert!(!args.contains(&"rawvideo".to_string()));
}

/// Every variant carries both sinks: the recording file and the low-latency
/// stream on stdout, in that order.
#[test]
fn test_every_variant_has_both_sinks() {
    let configs = [
        PipelineConfig::builder()
            .spawn_source("sim", vec![])
            .recording_path("/tmp/rec.mp4")
            .build(),
        PipelineConfig::builder()
            .capture_source("/dev/video0")
            .recording_path("/tmp/rec.mp4")
            .build(),
        PipelineConfig::builder()
            .ingest_source("rtsp://x")
            .recording_path("/tmp/rec.mp4")
            .build(),
    ];

    for config in &configs {
        let args = transcoder_args(config);
        let record = position(&args, "/tmp/rec.mp4");
        let stream = position(&args, "pipe:1");
        assert!(record < stream, "recording sink must precede the stream sink");
        assert_eq!(args[stream - 1], "mpegts");
        assert_eq!(args[stream - 2], "-f");
    }
}

#[test]
fn test_stream_sink_is_low_latency() {
    let config = PipelineConfig::builder()
        .spawn_source("sim", vec![])
        .recording_path("/tmp/rec.mp4")
        .build();
    let args = transcoder_args(&config);

    // Low-latency settings must sit on the streamed sink, after the
    // recording path.
    let record = position(&args, "/tmp/rec.mp4");
    let ultrafast = position(&args, "ultrafast");
    let zerolatency = position(&args, "zerolatency");
    assert!(ultrafast > record);
    assert!(zerolatency > record);
}

#[test]
fn test_recording_sink_keeps_its_own_settings() {
    let config = PipelineConfig::builder()
        .ingest_source("rtsp://x")
        .recording_path("/tmp/rec.mp4")
        .build();
    let args = transcoder_args(&config);

    let record = position(&args, "/tmp/rec.mp4");
    let medium = position(&args, "medium");
    assert!(medium < record, "recording preset belongs to the recording sink");
}

#[test]
fn test_bitrate_flag_when_configured() {
    let mut config = PipelineConfig::builder()
        .ingest_source("rtsp://x")
        .recording_path("/tmp/rec.mp4")
        .build();
    config.transcoder.stream_encode.bitrate = Some(2_000_000);
    let args = transcoder_args(&config);

    let b = position(&args, "-b:v");
    assert_eq!(args[b + 1], "2000000");
}

#[test]
fn test_overwrite_flag_present() {
    let config = PipelineConfig::builder()
        .ingest_source("rtsp://x")
        .recording_path("/tmp/rec.mp4")
        .build();
    assert!(transcoder_args(&config).contains(&"-y".to_string()));
}
