use serde::Deserialize;
use serde_json::Value;

/// Marks a producer stderr line as a structured control message.
pub const RESPONSE_PREFIX: &str = "__CMD__:";

/// Response type announcing the producer's stream endpoint.
pub const READY_KIND: &str = "server-ready";
/// Response type carrying a producer-side failure.
pub const ERROR_KIND: &str = "error";

/// Inbound control message.
///
/// Only `server-ready` and `error` mean anything to the startup handshake;
/// every other `type` is forwarded upward unmodified, with its payload kept
/// in `rest`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// One interpreted stderr line.
#[derive(Debug, Clone)]
pub enum StderrEvent {
    Response(ControlResponse),
    Log(String),
}

/// Interpret a reassembled stderr line.
///
/// A prefixed line whose remainder fails to parse is downgraded to a log
/// line; malformed control output must never take the pipeline down, and it
/// must not disturb the interpretation of later lines.
pub fn interpret(line: &str) -> StderrEvent {
    match line.strip_prefix(RESPONSE_PREFIX) {
        Some(json) => match serde_json::from_str::<ControlResponse>(json) {
            Ok(response) => StderrEvent::Response(response),
            Err(e) => {
                log::warn!("Protocol: malformed control line ({}): {}", e, line);
                StderrEvent::Log(line.to_string())
            }
        },
        None => StderrEvent::Log(line.to_string()),
    }
}

/// Serialize an outbound command as a single newline-terminated JSON line.
/// Writing it to the producer is the pipeline's job and may still fail.
pub fn serialize_command(cmd: &Value) -> String {
    let mut line = cmd.to_string();
    line.push('\n');
    line
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod protocol_test;
